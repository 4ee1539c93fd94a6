use crate::application::profile_sync::ProfileReadiness;
use crate::infrastructure::identity::AuthState;
use tokio::sync::watch;

/// `true` while the shell should keep showing its loading state.
pub fn app_is_loading(identity_loading: bool, profile_ready: bool) -> bool {
    identity_loading || !profile_ready
}

/// Derives the application-wide loading flag from the identity state and the
/// profile readiness signal. Holds no state of its own.
///
/// Profile readiness only counts when it was reached for the identity that is
/// current right now, so a sign-in reads as loading until the profile sync has
/// caught up with it.
#[derive(Debug, Clone)]
pub struct ReadinessAggregator {
    identities: watch::Receiver<AuthState>,
    profile_ready: watch::Receiver<ProfileReadiness>,
}

impl ReadinessAggregator {
    pub fn new(
        identities: watch::Receiver<AuthState>,
        profile_ready: watch::Receiver<ProfileReadiness>,
    ) -> Self {
        Self {
            identities,
            profile_ready,
        }
    }

    pub fn is_loading(&self) -> bool {
        let identity = self.identities.borrow().clone();
        let profile_ready = self.profile_ready.borrow().is_ready_for(&identity);
        app_is_loading(identity.is_loading(), profile_ready)
    }

    /// Waits until either input changes and returns the recomputed flag.
    /// Returns `None` once both inputs are gone.
    pub async fn changed(&mut self) -> Option<bool> {
        let open = tokio::select! {
            changed = self.identities.changed() => changed.is_ok() || self.profile_ready.changed().await.is_ok(),
            changed = self.profile_ready.changed() => changed.is_ok() || self.identities.changed().await.is_ok(),
        };
        if !open {
            return None;
        }
        self.identities.borrow_and_update();
        self.profile_ready.borrow_and_update();
        Some(self.is_loading())
    }
}
