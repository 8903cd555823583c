//! Small async helpers shared by the pool loops

use std::time::Duration;

use tokio::sync::watch;

/// Sleep that a stop signal can cut short.
///
/// Returns `true` when the sleep was interrupted by the stop channel (or
/// the channel's sender side is gone), `false` when the full duration
/// elapsed.
pub(crate) async fn sleep_cancellable(
    duration: Duration,
    mut stop: watch::Receiver<bool>,
) -> bool {
    if *stop.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop.changed() => true,
    }
}
