//! Host capabilities handed to the synchronizer at construction

use std::sync::Arc;

use crate::video::{FramePipeline, PixelFormat};
use crate::Result;

/// Called with a message for every non-fatal error
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Called by the machine context after every time slice
pub type ProcessCallback = Box<dyn FnMut() -> Result<()> + Send>;

/// What the hosting frontend provides
#[derive(Default)]
pub struct HostCapabilities {
    /// Pixel format the host displays
    pub pixel_format: PixelFormat,
    /// Error reporting; errors are logged when absent
    pub error_callback: Option<ErrorCallback>,
    /// Periodic hook on the machine context
    pub process_callback: Option<ProcessCallback>,
}

impl HostCapabilities {
    /// Capabilities for `pixel_format` with no callbacks
    pub fn new(pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format,
            ..Self::default()
        }
    }

    /// Set the error callback
    pub fn with_error_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error_callback = Some(Box::new(callback));
        self
    }

    /// Set the process callback
    pub fn with_process_callback(
        mut self,
        callback: impl FnMut() -> Result<()> + Send + 'static,
    ) -> Self {
        self.process_callback = Some(Box::new(callback));
        self
    }

    /// Report a non-fatal error
    pub fn report_error(&self, msg: &str) {
        match self.error_callback.as_ref() {
            Some(callback) => callback(msg),
            None => tracing::error!("{msg}"),
        }
    }

    /// Build a frame pipeline in the host's pixel format
    pub fn create_pipeline(&self, half_frame: bool) -> Result<Arc<FramePipeline>> {
        Ok(Arc::new(FramePipeline::new(self.pixel_format, half_frame)?))
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("pixel_format", &self.pixel_format)
            .field("error_callback", &self.error_callback.is_some())
            .field("process_callback", &self.process_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_error_callback_receives_message() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let caps = HostCapabilities::new(PixelFormat::Xrgb8888)
            .with_error_callback(move |msg| sink.lock().push_str(msg));
        caps.report_error("tape image damaged");
        assert_eq!(*seen.lock(), "tape image damaged");

        let pipe = caps.create_pipeline(true).unwrap();
        assert!(!pipe.is_shut_down());
    }
}
