//! Re-authentication hook.

use crate::auth::backend::RefreshError;

/// Invoked once per terminally failed refresh, never once per waiter.
pub trait ReauthHook: Send + Sync {
    fn reauthenticate(&self, reason: &RefreshError);
}

impl<F> ReauthHook for F
where
    F: Fn(&RefreshError) + Send + Sync,
{
    fn reauthenticate(&self, reason: &RefreshError) {
        self(reason)
    }
}

/// Hook that only logs; used when the embedding application installs none.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReauthHook;

impl ReauthHook for LogReauthHook {
    fn reauthenticate(&self, reason: &RefreshError) {
        tracing::warn!(reason = %reason, "Session expired; re-authentication required");
    }
}
