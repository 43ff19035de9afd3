//! Helpers around the `watch` channel used as the process-wide stop signal.

use tokio::sync::watch;

/// Completes once the stop signal is raised.
///
/// If every sender is gone without raising it, the future never completes.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Returns true if the stop signal has been raised.
pub fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
