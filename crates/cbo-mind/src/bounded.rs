use cbo_core::capability::{CapabilityError, CapabilityFailureKind};
use std::sync::mpsc;
use std::time::Duration;

/// Runs a capability call on a worker thread and gives up after `timeout_ms`.
///
/// A timed-out worker is left to finish on its own; its result is discarded.
pub(crate) fn call_bounded<T, F>(timeout_ms: u64, call: F) -> Result<T, CapabilityError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CapabilityError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("cbo-capability".to_string())
        .spawn(move || {
            let _ = tx.send(call());
        });
    if let Err(err) = spawned {
        return Err(CapabilityError::new(
            CapabilityFailureKind::Unavailable,
            format!("failed to start capability worker: {err}"),
        ));
    }

    match rx.recv_timeout(Duration::from_millis(timeout_ms.max(1))) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CapabilityError::timeout(timeout_ms)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(CapabilityError::new(
            CapabilityFailureKind::ProviderError,
            "capability worker exited without a result",
        )),
    }
}
