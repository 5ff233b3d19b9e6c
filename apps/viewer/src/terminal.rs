use std::io::Write;

use chrono::Local;
use client_core::RenderSurface;
use tracing::warn;

const BAR_WIDTH: usize = 20;

/// Renders the rollout view as plain lines on a terminal.
///
/// Progress and label changes are collected and printed as one status line
/// when the update ends with `scroll_log_to_bottom`.
pub struct TerminalSurface<W: Write> {
    out: W,
    progress: u32,
    weights_label: String,
    status_dirty: bool,
    timestamps: bool,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, timestamps: bool) -> Self {
        Self {
            out,
            progress: 0,
            weights_label: String::new(),
            status_dirty: false,
            timestamps,
        }
    }

    pub fn status_line(&self) -> String {
        let line = format!("{} {:>3}%", render_bar(self.progress), self.progress);
        if self.weights_label.is_empty() {
            line
        } else {
            format!("{line}  {}", self.weights_label)
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        let result = if self.timestamps {
            writeln!(self.out, "[{}] {line}", Local::now().format("%H:%M:%S"))
        } else {
            writeln!(self.out, "{line}")
        };
        if let Err(error) = result {
            warn!(%error, "failed to write to terminal");
        }
    }
}

impl<W: Write> RenderSurface for TerminalSurface<W> {
    fn append_log(&mut self, line: &str) {
        self.write_line(line);
    }

    fn scroll_log_to_bottom(&mut self) {
        if self.status_dirty {
            self.status_dirty = false;
            let status = self.status_line();
            self.write_line(&status);
        }
        if let Err(error) = self.out.flush() {
            warn!(%error, "failed to flush terminal");
        }
    }

    fn set_progress(&mut self, percent: u32) {
        self.progress = percent.min(100);
        self.status_dirty = true;
    }

    fn set_weights_label(&mut self, label: &str) {
        self.weights_label = label.to_string();
        self.status_dirty = true;
    }

    fn show_error(&mut self, message: &str) {
        self.write_line(&format!("error: {message}"));
    }
}

pub fn render_bar(percent: u32) -> String {
    let filled = (percent.min(100) as usize * BAR_WIDTH) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;
