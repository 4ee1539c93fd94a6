pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod profile_document;
pub mod session_store;
pub mod user_store;
