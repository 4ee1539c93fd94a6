use crate::domain::models::{Identity, UserProfile};
use crate::infrastructure::error::{ProfileError, StoreError};
use crate::infrastructure::identity::AuthState;
use crate::infrastructure::profile_document::{decode_profile, encode_profile, DecodeMode};
use crate::infrastructure::user_store::{RecordEvent, RecordSubscription, UserStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Whether the profile has caught up with an identity event, and which one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileReadiness {
    Pending,
    /// Done reacting to `uid`, or to "signed out" when `uid` is `None`.
    Ready { uid: Option<String> },
}

impl ProfileReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Ready, and for exactly the identity `state` reports.
    pub fn is_ready_for(&self, state: &AuthState) -> bool {
        match (self, state) {
            (Self::Ready { uid }, AuthState::SignedIn(identity)) => {
                uid.as_deref() == Some(identity.uid.as_str())
            }
            (Self::Ready { uid }, AuthState::SignedOut) => uid.is_none(),
            _ => false,
        }
    }
}

struct SyncShared<U>
where
    U: UserStore + ?Sized,
{
    store: Arc<U>,
    profile_tx: watch::Sender<UserProfile>,
    ready_tx: watch::Sender<ProfileReadiness>,
    now_provider: NowProvider,
}

impl<U> SyncShared<U>
where
    U: UserStore + ?Sized,
{
    fn replace_profile(&self, profile: UserProfile) {
        self.profile_tx.send_if_modified(|current| {
            if *current == profile {
                return false;
            }
            *current = profile;
            true
        });
    }

    fn set_ready(&self, ready: ProfileReadiness) {
        self.ready_tx.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            *current = ready;
            true
        });
    }

    async fn load_or_create(&self, identity: &Identity) -> Result<UserProfile, StoreError> {
        if let Some(record) = self.store.get_record(&identity.uid).await? {
            return decode_profile(&identity.uid, &record, DecodeMode::Fetch);
        }

        let profile = UserProfile::new_for(identity, (self.now_provider)());
        self.store
            .create_record(&identity.uid, encode_profile(&profile))
            .await?;
        tracing::info!(uid = %identity.uid, "created profile record");
        Ok(profile)
    }

    async fn attach(
        &self,
        identity: &Identity,
    ) -> Result<(UserProfile, Option<RecordSubscription>), StoreError> {
        let profile = self.load_or_create(identity).await?;
        let subscription = match self.store.subscribe(&identity.uid).await {
            Ok(subscription) => Some(subscription),
            Err(error) => {
                tracing::warn!(uid = %identity.uid, error = %error, "live profile updates unavailable");
                None
            }
        };
        Ok((profile, subscription))
    }

    fn apply_live_update(&self, uid: &str, event: RecordEvent) {
        match event {
            RecordEvent::Changed(record) => match decode_profile(uid, &record, DecodeMode::LiveUpdate) {
                Ok(profile) => self.replace_profile(profile),
                Err(error) => {
                    tracing::warn!(uid, error = %error, "dropped malformed profile update");
                }
            },
            RecordEvent::Removed => {
                tracing::debug!(uid, "profile record removed remotely");
            }
        }
    }
}

enum Followed {
    Superseded,
    Closed,
}

impl From<Result<(), watch::error::RecvError>> for Followed {
    fn from(value: Result<(), watch::error::RecvError>) -> Self {
        match value {
            Ok(()) => Self::Superseded,
            Err(_) => Self::Closed,
        }
    }
}

/// Keeps the in-memory profile in step with the signed-in identity.
///
/// A background driver follows the identity channel. Every identity event
/// drops the previous live subscription and any load still in flight, so only
/// the latest identity can ever write the profile.
pub struct ProfileSync<U>
where
    U: UserStore + ?Sized + 'static,
{
    shared: Arc<SyncShared<U>>,
    driver: JoinHandle<()>,
}

impl<U> ProfileSync<U>
where
    U: UserStore + ?Sized + 'static,
{
    /// Starts following `identities`. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<U>, identities: watch::Receiver<AuthState>) -> Self {
        Self::spawn_with_now_provider(store, identities, Arc::new(Utc::now))
    }

    pub fn spawn_with_now_provider(
        store: Arc<U>,
        identities: watch::Receiver<AuthState>,
        now_provider: NowProvider,
    ) -> Self {
        let (profile_tx, _) = watch::channel(UserProfile::empty());
        let (ready_tx, _) = watch::channel(ProfileReadiness::Pending);
        let shared = Arc::new(SyncShared {
            store,
            profile_tx,
            ready_tx,
            now_provider,
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared), identities));
        Self { shared, driver }
    }

    pub fn profile(&self) -> UserProfile {
        self.shared.profile_tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready_tx.borrow().is_ready()
    }

    pub fn readiness(&self) -> ProfileReadiness {
        self.shared.ready_tx.borrow().clone()
    }

    pub fn subscribe_profile(&self) -> watch::Receiver<UserProfile> {
        self.shared.profile_tx.subscribe()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<ProfileReadiness> {
        self.shared.ready_tx.subscribe()
    }

    /// Replaces the local profile, then writes it remotely. A failed remote
    /// write is returned but the local copy is kept.
    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), ProfileError> {
        profile.validate().map_err(ProfileError::Invalid)?;

        let mut outcome = Ok(());
        self.shared.profile_tx.send_if_modified(|current| {
            if current.is_empty() {
                outcome = Err(ProfileError::NoActiveProfile);
                return false;
            }
            if current.id != profile.id {
                outcome = Err(ProfileError::IdentityMismatch {
                    requested: profile.id.clone(),
                });
                return false;
            }
            if *current == profile {
                return false;
            }
            *current = profile.clone();
            true
        });
        outcome?;

        if let Err(error) = self
            .shared
            .store
            .update_record(&profile.id, encode_profile(&profile))
            .await
        {
            tracing::warn!(uid = %profile.id, error = %error, "remote profile write failed; keeping local copy");
            return Err(error.into());
        }
        Ok(())
    }

    /// Deletes the remote record, then clears the local copy and returns the
    /// removed profile. Nothing local changes when the remote delete fails.
    pub async fn delete_profile(&self) -> Result<UserProfile, ProfileError> {
        let current = self.profile();
        if current.is_empty() {
            return Err(ProfileError::NoActiveProfile);
        }

        self.shared.store.delete_record(&current.id).await?;
        self.shared.profile_tx.send_if_modified(|profile| {
            if profile.id != current.id {
                return false;
            }
            *profile = UserProfile::empty();
            true
        });
        tracing::info!(uid = %current.id, "deleted profile record");
        Ok(current)
    }

    /// Writes back a profile removed by [`ProfileSync::delete_profile`] and
    /// adopts it again if its identity is still the one being followed.
    pub async fn restore_profile(&self, profile: UserProfile) -> Result<(), ProfileError> {
        profile.validate().map_err(ProfileError::Invalid)?;
        self.shared
            .store
            .create_record(&profile.id, encode_profile(&profile))
            .await?;

        let followed = ProfileReadiness::Ready {
            uid: Some(profile.id.clone()),
        };
        if *self.shared.ready_tx.borrow() == followed {
            self.shared.profile_tx.send_if_modified(|current| {
                if !current.is_empty() {
                    return false;
                }
                *current = profile.clone();
                true
            });
        }
        tracing::info!(uid = %profile.id, "restored profile record");
        Ok(())
    }

    /// Claims `name` for the signed-in profile and marks the name as set.
    pub async fn set_display_name(&self, name: &str) -> Result<UserProfile, ProfileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProfileError::Invalid("display name must not be empty".to_string()));
        }

        let current = self.profile();
        if current.is_empty() {
            return Err(ProfileError::NoActiveProfile);
        }
        if current.is_name_set && current.display_name == name {
            return Ok(current);
        }
        if self.shared.store.exists_by_name(name).await? {
            return Err(ProfileError::NameTaken(name.to_string()));
        }

        let updated = UserProfile {
            display_name: name.to_string(),
            is_name_set: true,
            ..current
        };
        self.update_profile(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn search_users(&self, prefix: &str) -> Result<Vec<UserProfile>, ProfileError> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.shared.store.search_by_name_prefix(prefix).await?;
        Ok(records
            .into_iter()
            .filter_map(|(id, record)| match decode_profile(&id, &record, DecodeMode::Fetch) {
                Ok(profile) => Some(profile),
                Err(error) => {
                    tracing::debug!(uid = %id, error = %error, "skipped unreadable search result");
                    None
                }
            })
            .collect())
    }

    pub async fn name_exists(&self, name: &str) -> Result<bool, ProfileError> {
        Ok(self.shared.store.exists_by_name(name.trim()).await?)
    }
}

impl<U> Drop for ProfileSync<U>
where
    U: UserStore + ?Sized + 'static,
{
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive<U>(shared: Arc<SyncShared<U>>, mut identities: watch::Receiver<AuthState>)
where
    U: UserStore + ?Sized,
{
    loop {
        let state = identities.borrow_and_update().clone();
        match state {
            AuthState::Loading => {
                shared.replace_profile(UserProfile::empty());
                shared.set_ready(ProfileReadiness::Pending);
            }
            AuthState::SignedOut => {
                shared.replace_profile(UserProfile::empty());
                shared.set_ready(ProfileReadiness::Ready { uid: None });
                tracing::info!("signed out; profile cleared");
            }
            AuthState::SignedIn(identity) => match follow(&shared, &identity, &mut identities).await {
                Followed::Superseded => continue,
                Followed::Closed => break,
            },
        }

        if identities.changed().await.is_err() {
            break;
        }
    }
    tracing::debug!("identity channel closed; profile sync stopped");
}

/// Loads and then observes the profile of `identity` until the identity changes.
async fn follow<U>(
    shared: &SyncShared<U>,
    identity: &Identity,
    identities: &mut watch::Receiver<AuthState>,
) -> Followed
where
    U: UserStore + ?Sized,
{
    shared.replace_profile(UserProfile::empty());
    shared.set_ready(ProfileReadiness::Pending);

    let attached = tokio::select! {
        biased;
        changed = identities.changed() => return changed.into(),
        attached = shared.attach(identity) => attached,
    };

    let mut subscription = match attached {
        Ok((profile, subscription)) => {
            shared.replace_profile(profile);
            tracing::info!(uid = %identity.uid, "profile ready");
            subscription
        }
        Err(error) => {
            tracing::warn!(uid = %identity.uid, error = %error, "profile load failed; continuing without profile");
            None
        }
    };
    shared.set_ready(ProfileReadiness::Ready {
        uid: Some(identity.uid.clone()),
    });

    loop {
        let Some(feed) = subscription.as_mut() else {
            return identities.changed().await.into();
        };
        let event = tokio::select! {
            biased;
            changed = identities.changed() => return changed.into(),
            event = feed.next() => event,
        };
        match event {
            Some(event) => shared.apply_live_update(&identity.uid, event),
            None => {
                tracing::warn!(uid = %identity.uid, "live profile feed ended");
                subscription = None;
            }
        }
    }
}
