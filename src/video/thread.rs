//! Optional consumer thread for the frame pipeline

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::pipeline::FramePipeline;
use crate::{Error, Result};

/// Upper bound on one idle wait of the display loop
pub const DISPLAY_WAIT: Duration = Duration::from_millis(10);

/// Runs [`FramePipeline::pump`] on its own thread
///
/// The loop sleeps until the producer queues a frame-done event, or at most
/// [`DISPLAY_WAIT`]. Dropping the handle shuts the pipeline down and joins
/// the thread.
#[derive(Debug)]
pub struct DisplayThread {
    pipeline: Arc<FramePipeline>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayThread {
    /// Start consuming `pipeline`
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the thread cannot be spawned.
    pub fn spawn(pipeline: Arc<FramePipeline>) -> Result<Self> {
        let worker = Arc::clone(&pipeline);
        let handle = std::thread::Builder::new()
            .name("ep128-display".into())
            .spawn(move || {
                tracing::debug!("display thread started");
                while !worker.is_shut_down() {
                    worker.wait_for_wake(DISPLAY_WAIT);
                    worker.pump();
                }
                tracing::debug!("display thread exiting");
            })
            .map_err(|e| Error::Resource(format!("display thread: {e}")))?;
        Ok(Self {
            pipeline,
            handle: Some(handle),
        })
    }

    /// The pipeline this thread drains
    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    /// Shut the pipeline down and wait for the thread
    pub fn join(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.pipeline.shutdown();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadTerminated),
            None => Ok(()),
        }
    }
}

impl Drop for DisplayThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("display thread: {e}");
        }
    }
}
