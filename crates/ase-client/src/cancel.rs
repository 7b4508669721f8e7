//! Request cancellation support.
//!
//! ASE cancels a request when it receives an attention packet. The session's
//! transport is split into read and write halves, so a [`CancelHandle`] can
//! write the attention from another task while the owning task is blocked
//! reading results. The owning task then drains the response until the
//! server acknowledges the attention.
//!
//! ```rust,ignore
//! let cancel = session.cancel_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     cancel.cancel().await.ok();
//! });
//!
//! // Fails with Error::Cancelled if it runs longer than 5 seconds.
//! let rows = session.execute_non_query("exec long_running_proc", &[]).await;
//! ```
//!
//! - Calling `cancel()` more than once has no further effect.
//! - Calling it while no request is in flight does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ase_codec::AttentionHandle;

use crate::error::Result;
use crate::transport::Transport;

/// Handle for cancelling the request currently running on a session.
///
/// The handle is `Clone + Send + Sync` and may outlive the session; once the
/// session is gone, cancelling fails with an IO error.
#[derive(Clone)]
pub struct CancelHandle {
    attention: AttentionHandle<Transport>,
    in_request: Arc<AtomicBool>,
}

impl CancelHandle {
    pub(crate) fn new(attention: AttentionHandle<Transport>, in_request: Arc<AtomicBool>) -> Self {
        Self {
            attention,
            in_request,
        }
    }

    /// Send an attention for the in-flight request.
    ///
    /// Returns `false` when nothing was sent: no request is running or an
    /// attention is already outstanding.
    pub async fn cancel(&self) -> Result<bool> {
        if !self.in_request.load(Ordering::Acquire) {
            tracing::trace!("cancel requested with no request in flight");
            return Ok(false);
        }
        Ok(self.attention.send().await?)
    }

    /// Check if an attention is outstanding.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.attention.is_pending()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("in_request", &self.in_request.load(Ordering::Acquire))
            .field("is_cancelling", &self.is_cancelling())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CancelHandle>();
    }

    #[test]
    fn test_cancel_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<CancelHandle>();
    }
}
