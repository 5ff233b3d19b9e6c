/// Rendering target owned by a [`crate::viewer::RolloutViewer`].
pub trait RenderSurface {
    fn append_log(&mut self, line: &str);
    /// Ends every update; surfaces that redraw in batches do so here.
    fn scroll_log_to_bottom(&mut self);
    /// `percent` is the progress width, 0 to 100.
    fn set_progress(&mut self, percent: u32);
    /// Replaces the previous label.
    fn set_weights_label(&mut self, label: &str);
    fn show_error(&mut self, message: &str);
}

/// Surface that only records what it was told to display.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    log: Vec<String>,
    scroll_offset: usize,
    progress: u32,
    weights_label: String,
    error: Option<String>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn is_scrolled_to_bottom(&self) -> bool {
        self.scroll_offset == self.log.len()
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn progress_width(&self) -> String {
        format!("{}%", self.progress)
    }

    pub fn weights_label(&self) -> &str {
        &self.weights_label
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl RenderSurface for MemorySurface {
    fn append_log(&mut self, line: &str) {
        self.log.push(line.to_string());
    }

    fn scroll_log_to_bottom(&mut self) {
        self.scroll_offset = self.log.len();
    }

    fn set_progress(&mut self, percent: u32) {
        self.progress = percent;
    }

    fn set_weights_label(&mut self, label: &str) {
        self.weights_label = label.to_string();
    }

    fn show_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }
}

impl<T: RenderSurface + ?Sized> RenderSurface for &mut T {
    fn append_log(&mut self, line: &str) {
        (**self).append_log(line);
    }

    fn scroll_log_to_bottom(&mut self) {
        (**self).scroll_log_to_bottom();
    }

    fn set_progress(&mut self, percent: u32) {
        (**self).set_progress(percent);
    }

    fn set_weights_label(&mut self, label: &str) {
        (**self).set_weights_label(label);
    }

    fn show_error(&mut self, message: &str) {
        (**self).show_error(message);
    }
}
