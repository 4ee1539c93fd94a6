pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::profile_sync::ProfileSync;
pub use application::readiness::{ReadinessAggregator, app_is_loading};
pub use application::timer_engine::TimerEngine;
pub use domain::models::{Identity, TimerConfig, TimerPhase, TimerState, UserProfile};
pub use domain::timer::{TimerSnapshot, format_clock};
pub use infrastructure::error::{AuthError, InfraError, ProfileError, StoreError};

use application::bootstrap::bootstrap_workspace;
use infrastructure::identity::{IdentityService, LocalIdentityService};
use infrastructure::logging::init_logging;
use infrastructure::session_store::KeyringSessionStore;
use infrastructure::user_store::{InMemoryUserStore, UserStore};
use std::path::PathBuf;
use std::sync::Arc;

const SESSION_ACCOUNT: &str = "default";

async fn run_headless(workspace_root: PathBuf) -> Result<(), InfraError> {
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    init_logging(&bootstrap.logs_dir)?;
    tracing::info!(
        app = %bootstrap.config.app_name,
        workspace = %bootstrap.workspace_root.display(),
        "starting"
    );

    let session_store = Arc::new(KeyringSessionStore::new(
        bootstrap.config.session_service.clone(),
        SESSION_ACCOUNT,
    ));
    let identity = Arc::new(LocalIdentityService::new(session_store));
    let identity_service: Arc<dyn IdentityService> = identity.clone();
    let user_store: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::default());
    let state = AppState::with_bootstrap(bootstrap, identity_service, user_store)?;

    let mut readiness = state.readiness();
    tokio::spawn(async move {
        while let Some(loading) = readiness.changed().await {
            tracing::info!(loading, "app loading state changed");
        }
    });

    let mut timer = state.subscribe_timer();
    tokio::spawn(async move {
        let mut last_phase = timer.borrow_and_update().phase;
        while timer.changed().await.is_ok() {
            let snapshot = *timer.borrow_and_update();
            if snapshot.phase != last_phase {
                tracing::info!(
                    phase = snapshot.phase.as_str(),
                    session = snapshot.session_index,
                    "timer entered phase"
                );
                last_phase = snapshot.phase;
            }
        }
    });

    identity.restore();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

pub fn run() {
    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    runtime
        .block_on(run_headless(workspace_root))
        .expect("failed to run app");
}
