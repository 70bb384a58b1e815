use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Fire-once session-expiry signal.
///
/// Each signed-in session gets its own token; `expire` cancels it (a second
/// call is a no-op) and `renew` starts a fresh one after the user signs in
/// again.
#[derive(Debug, Default)]
pub struct SessionGate {
    token: Mutex<CancellationToken>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for the current session. Resolves `cancelled()` on expiry.
    pub fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn expire(&self) {
        let token = self.current();
        if !token.is_cancelled() {
            tracing::info!("Session expired");
            token.cancel();
        }
    }

    pub fn is_expired(&self) -> bool {
        self.current().is_cancelled()
    }

    pub fn renew(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expire_fires_once_and_renew_resets() {
        let gate = SessionGate::new();
        let token = gate.current();
        assert!(!gate.is_expired());

        gate.expire();
        gate.expire();
        token.cancelled().await;
        assert!(gate.is_expired());

        gate.renew();
        assert!(!gate.is_expired());
        assert!(token.is_cancelled());
    }
}
