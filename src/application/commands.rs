use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::profile_sync::ProfileSync;
use crate::application::readiness::ReadinessAggregator;
use crate::application::timer_engine::TimerEngine;
use crate::domain::models::{Identity, TimerConfig, UserProfile};
use crate::domain::timer::{TimerSnapshot, format_clock};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::{InfraError, ProfileError};
use crate::infrastructure::identity::IdentityService;
use crate::infrastructure::user_store::UserStore;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the shell talks to, built once at startup.
pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    identity: Arc<dyn IdentityService>,
    profile_sync: ProfileSync<dyn UserStore>,
    readiness: ReadinessAggregator,
    timer: TimerEngine,
}

impl AppState {
    /// Prepares the workspace and wires the services together. Must be called
    /// inside a Tokio runtime.
    pub fn new(
        workspace_root: PathBuf,
        identity: Arc<dyn IdentityService>,
        user_store: Arc<dyn UserStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::with_bootstrap(bootstrap, identity, user_store)
    }

    /// Same as [`AppState::new`] for a workspace that is already bootstrapped.
    pub fn with_bootstrap(
        bootstrap: BootstrapResult,
        identity: Arc<dyn IdentityService>,
        user_store: Arc<dyn UserStore>,
    ) -> Result<Self, InfraError> {
        let timer = TimerEngine::new(bootstrap.config.timer)?;
        let profile_sync = ProfileSync::spawn(user_store, identity.subscribe());
        let readiness = ReadinessAggregator::new(identity.subscribe(), profile_sync.subscribe_ready());

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            config: bootstrap.config,
            identity,
            profile_sync,
            readiness,
            timer,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profile_sync(&self) -> &ProfileSync<dyn UserStore> {
        &self.profile_sync
    }

    pub fn readiness(&self) -> ReadinessAggregator {
        self.readiness.clone()
    }

    pub fn subscribe_timer(&self) -> watch::Receiver<TimerSnapshot> {
        self.timer.subscribe()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimerStateResponse {
    pub phase: String,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub session_index: u32,
    pub sessions_per_cycle: u32,
    pub running: bool,
    pub progress: f64,
    pub clock: String,
}

fn to_timer_state_response(snapshot: TimerSnapshot) -> TimerStateResponse {
    TimerStateResponse {
        phase: snapshot.phase.as_str().to_string(),
        remaining_seconds: snapshot.remaining_seconds,
        total_seconds: snapshot.total_seconds,
        session_index: snapshot.session_index,
        sessions_per_cycle: snapshot.sessions_per_cycle,
        running: snapshot.running,
        progress: snapshot.progress,
        clock: format_clock(snapshot.remaining_seconds),
    }
}

fn require_credentials<'a>(email: &'a str, password: &'a str) -> Result<(&'a str, &'a str), InfraError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(InfraError::MissingCredentials);
    }
    Ok((email, password))
}

pub async fn sign_in_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<Identity, InfraError> {
    let (email, password) = require_credentials(&email, &password)?;
    let identity = state.identity.sign_in(email, password).await?;
    state.log_info("sign_in", &format!("signed in uid={}", identity.uid));
    Ok(identity)
}

pub async fn sign_up_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<Identity, InfraError> {
    let (email, password) = require_credentials(&email, &password)?;
    let identity = state.identity.sign_up(email, password).await?;
    state.log_info("sign_up", &format!("created account uid={}", identity.uid));
    Ok(identity)
}

pub async fn sign_in_with_external_credential_impl(
    state: &AppState,
    id_token: String,
    raw_nonce: String,
) -> Result<Identity, InfraError> {
    let identity = state
        .identity
        .sign_in_with_external_credential(&id_token, &raw_nonce)
        .await?;
    state.log_info(
        "sign_in_with_external_credential",
        &format!("signed in uid={}", identity.uid),
    );
    Ok(identity)
}

pub async fn sign_out_impl(state: &AppState) -> Result<(), InfraError> {
    state.identity.sign_out().await?;
    state.log_info("sign_out", "signed out");
    Ok(())
}

/// Deletes the profile record first, then the identity.
///
/// Nothing is touched unless the identity service would accept the delete. A
/// failed profile delete leaves the identity untouched, and a failed identity
/// delete writes the removed profile back.
pub async fn delete_account_impl(state: &AppState) -> Result<(), InfraError> {
    state.identity.ensure_can_delete_current_identity().await?;

    let removed = match state.profile_sync.delete_profile().await {
        Ok(profile) => Some(profile),
        Err(ProfileError::NoActiveProfile) => None,
        Err(error) => return Err(error.into()),
    };

    if let Err(error) = state.identity.delete_current_identity().await {
        if let Some(profile) = removed {
            let uid = profile.id.clone();
            if let Err(restore_error) = state.profile_sync.restore_profile(profile).await {
                state.log_error(
                    "delete_account",
                    &format!("failed to restore profile uid={uid}: {restore_error}"),
                );
            }
        }
        return Err(error.into());
    }
    state.log_info("delete_account", "deleted account");
    Ok(())
}

pub fn get_profile_impl(state: &AppState) -> Result<UserProfile, InfraError> {
    Ok(state.profile_sync.profile())
}

pub fn has_active_subscription_impl(state: &AppState) -> Result<bool, InfraError> {
    Ok(state.profile_sync.profile().has_active_subscription(Utc::now()))
}

pub async fn set_display_name_impl(state: &AppState, name: String) -> Result<UserProfile, InfraError> {
    let profile = state.profile_sync.set_display_name(&name).await?;
    state.log_info(
        "set_display_name",
        &format!("uid={} name={}", profile.id, profile.display_name),
    );
    Ok(profile)
}

pub async fn search_users_impl(state: &AppState, prefix: String) -> Result<Vec<UserProfile>, InfraError> {
    Ok(state.profile_sync.search_users(&prefix).await?)
}

pub async fn name_exists_impl(state: &AppState, name: String) -> Result<bool, InfraError> {
    Ok(state.profile_sync.name_exists(&name).await?)
}

pub fn is_app_loading_impl(state: &AppState) -> Result<bool, InfraError> {
    Ok(state.readiness.is_loading())
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    Ok(to_timer_state_response(state.timer.snapshot()))
}

pub fn start_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.start();
    state.log_info("start_timer", &format!("phase={}", snapshot.phase.as_str()));
    Ok(to_timer_state_response(snapshot))
}

pub fn pause_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.pause();
    state.log_info(
        "pause_timer",
        &format!("remaining={}", format_clock(snapshot.remaining_seconds)),
    );
    Ok(to_timer_state_response(snapshot))
}

pub fn toggle_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.toggle();
    state.log_info("toggle_timer", &format!("running={}", snapshot.running));
    Ok(to_timer_state_response(snapshot))
}

pub fn skip_phase_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.skip_phase();
    state.log_info(
        "skip_phase",
        &format!("phase={} session={}", snapshot.phase.as_str(), snapshot.session_index),
    );
    Ok(to_timer_state_response(snapshot))
}

pub fn reset_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.reset_all();
    state.log_info("reset_timer", "reset timer");
    Ok(to_timer_state_response(snapshot))
}

pub fn update_timer_config_impl(
    state: &AppState,
    config: TimerConfig,
) -> Result<TimerStateResponse, InfraError> {
    let snapshot = state.timer.update_config(config)?;
    state.log_info(
        "update_timer_config",
        &format!(
            "focus={} small_break={} big_break={} sessions={}",
            config.focus_seconds,
            config.small_break_seconds,
            config.big_break_seconds,
            config.sessions_per_cycle
        ),
    );
    Ok(to_timer_state_response(snapshot))
}
