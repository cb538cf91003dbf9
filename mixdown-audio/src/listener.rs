use crate::error::MixerError;
use tokio::sync::mpsc;

/// Receives progress of a mixing run.
///
/// Callbacks are invoked synchronously on whichever thread drives the pump
/// loop, so implementations must return quickly.
pub trait ProgressListener: Send {
    /// Progress in `[0.0, 1.0]`, never decreasing within one run.
    fn on_progress(&mut self, progress: f64);

    /// Terminal signal, delivered exactly once per run, including failed runs.
    fn on_end(&mut self);

    /// Called before `on_end` when the run failed.
    fn on_error(&mut self, _err: &MixerError) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    Progress(f64),
    Error(String),
    End,
}

impl ProgressListener for mpsc::UnboundedSender<MixerEvent> {
    fn on_progress(&mut self, progress: f64) {
        if let Err(err) = self.send(MixerEvent::Progress(progress)) {
            tracing::trace!(?err, "Progress receiver dropped");
        }
    }

    fn on_end(&mut self) {
        if let Err(err) = self.send(MixerEvent::End) {
            tracing::trace!(?err, "End receiver dropped");
        }
    }

    fn on_error(&mut self, err: &MixerError) {
        if let Err(err) = self.send(MixerEvent::Error(err.to_string())) {
            tracing::trace!(?err, "Error receiver dropped");
        }
    }
}
