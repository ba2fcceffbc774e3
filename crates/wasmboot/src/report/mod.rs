use tracing::error;

use crate::BootstrapError;

/// Receives every bootstrap failure exactly once, before it is returned
/// to the caller.
pub trait Reporter: Send + Sync {
    fn report(&self, error: &BootstrapError);
}

/// Emits one `error` event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, err: &BootstrapError) {
        error!(
            target: "wasmboot",
            stage = "bootstrap",
            status = "error",
            kind = err.kind(),
            source = %err.origin(),
            error = %err,
            "module bootstrap failed"
        );
    }
}

impl<F> Reporter for F
where
    F: Fn(&BootstrapError) + Send + Sync,
{
    fn report(&self, error: &BootstrapError) {
        self(error)
    }
}
