pub mod bootstrap;
pub mod commands;
pub mod profile_sync;
pub mod readiness;
pub mod timer_engine;
