use crate::domain::models::Identity;
use crate::infrastructure::error::AuthError;
use crate::infrastructure::session_store::{SessionStore, StoredSession};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const MIN_PASSWORD_LENGTH: usize = 6;
const RECENT_SIGN_IN_WINDOW_SECONDS: i64 = 5 * 60;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What the identity service currently reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No identity event has been delivered yet.
    Loading,
    SignedOut,
    SignedIn(Identity),
}

impl AuthState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) => Some(identity),
            _ => None,
        }
    }
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_in_with_external_credential(
        &self,
        id_token: &str,
        raw_nonce: &str,
    ) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Fails the way [`IdentityService::delete_current_identity`] would,
    /// without deleting anything.
    async fn ensure_can_delete_current_identity(&self) -> Result<(), AuthError>;

    async fn delete_current_identity(&self) -> Result<(), AuthError>;

    /// Latest auth state; a new value is published on every identity change.
    fn subscribe(&self) -> watch::Receiver<AuthState>;
}

#[derive(Debug, Clone)]
struct LocalAccount {
    identity: Identity,
    password: String,
}

#[derive(Debug, Default)]
struct LocalDirectory {
    accounts_by_email: HashMap<String, LocalAccount>,
    external_subjects: HashMap<String, Identity>,
    current: Option<StoredSession>,
}

/// In-process stand-in for the hosted identity service.
///
/// Accounts live in memory; the signed-in session is persisted through a
/// [`SessionStore`] so that [`LocalIdentityService::restore`] can report it
/// again on the next start.
pub struct LocalIdentityService<S>
where
    S: SessionStore,
{
    session_store: Arc<S>,
    directory: Mutex<LocalDirectory>,
    state_tx: watch::Sender<AuthState>,
    next_uid: AtomicU64,
    now_provider: NowProvider,
}

impl<S> LocalIdentityService<S>
where
    S: SessionStore,
{
    pub fn new(session_store: Arc<S>) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Loading);
        Self {
            session_store,
            directory: Mutex::new(LocalDirectory::default()),
            state_tx,
            next_uid: AtomicU64::new(1),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Delivers the startup identity event from the persisted session.
    pub fn restore(&self) {
        let restored = match self.session_store.load_session() {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(error = %error, "failed to load persisted session, starting signed out");
                None
            }
        };

        let Ok(mut directory) = self.directory.lock() else {
            self.publish(AuthState::SignedOut);
            return;
        };
        directory.current = restored.clone();
        drop(directory);

        match restored {
            Some(session) => {
                tracing::info!(uid = %session.identity.uid, "restored persisted session");
                self.publish(AuthState::SignedIn(session.identity));
            }
            None => self.publish(AuthState::SignedOut),
        }
    }

    fn directory(&self) -> Result<std::sync::MutexGuard<'_, LocalDirectory>, AuthError> {
        self.directory
            .lock()
            .map_err(|error| AuthError::Unknown(format!("identity directory lock poisoned: {error}")))
    }

    fn next_uid(&self) -> String {
        let sequence = self.next_uid.fetch_add(1, Ordering::Relaxed);
        format!("uid-{}-{sequence}", (self.now_provider)().timestamp_micros())
    }

    fn begin_session(&self, directory: &mut LocalDirectory, identity: Identity) {
        let session = StoredSession {
            identity: identity.clone(),
            signed_in_at: (self.now_provider)(),
        };
        if let Err(error) = self.session_store.save_session(&session) {
            tracing::warn!(error = %error, "failed to persist session");
        }
        directory.current = Some(session);
        self.publish(AuthState::SignedIn(identity));
    }

    fn end_session(&self, directory: &mut LocalDirectory) {
        if let Err(error) = self.session_store.delete_session() {
            tracing::warn!(error = %error, "failed to clear persisted session");
        }
        directory.current = None;
        self.publish(AuthState::SignedOut);
    }

    fn deletable_session(&self, directory: &LocalDirectory) -> Result<StoredSession, AuthError> {
        let Some(session) = directory.current.clone() else {
            return Err(AuthError::NotFound);
        };
        let age = (self.now_provider)() - session.signed_in_at;
        if age > Duration::seconds(RECENT_SIGN_IN_WINDOW_SECONDS) {
            return Err(AuthError::RequiresRecentAuthentication);
        }
        Ok(session)
    }

    fn publish(&self, state: AuthState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

#[async_trait]
impl<S> IdentityService for LocalIdentityService<S>
where
    S: SessionStore,
{
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        let mut directory = self.directory()?;
        let identity = match directory.accounts_by_email.get(&email) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };
        self.begin_session(&mut directory, identity.clone());
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let mut directory = self.directory()?;
        if directory.accounts_by_email.contains_key(&email) {
            return Err(AuthError::EmailAlreadyInUse);
        }

        let identity = Identity {
            uid: self.next_uid(),
            email: email.clone(),
        };
        directory.accounts_by_email.insert(
            email,
            LocalAccount {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        self.begin_session(&mut directory, identity.clone());
        Ok(identity)
    }

    async fn sign_in_with_external_credential(
        &self,
        id_token: &str,
        raw_nonce: &str,
    ) -> Result<Identity, AuthError> {
        let subject = id_token.trim();
        if subject.is_empty() || raw_nonce.trim().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let mut directory = self.directory()?;
        let identity = match directory.external_subjects.get(subject) {
            Some(identity) => identity.clone(),
            None => {
                let identity = Identity {
                    uid: self.next_uid(),
                    email: String::new(),
                };
                directory
                    .external_subjects
                    .insert(subject.to_string(), identity.clone());
                identity
            }
        };
        self.begin_session(&mut directory, identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut directory = self.directory()?;
        self.end_session(&mut directory);
        Ok(())
    }

    async fn ensure_can_delete_current_identity(&self) -> Result<(), AuthError> {
        let directory = self.directory()?;
        self.deletable_session(&directory).map(|_| ())
    }

    async fn delete_current_identity(&self) -> Result<(), AuthError> {
        let mut directory = self.directory()?;
        let session = self.deletable_session(&directory)?;

        let uid = session.identity.uid;
        directory
            .accounts_by_email
            .retain(|_, account| account.identity.uid != uid);
        directory
            .external_subjects
            .retain(|_, identity| identity.uid != uid);
        self.end_session(&mut directory);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail);
    };
    let valid = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    if !valid {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}
