use thiserror::Error;

/// Identity service failures. The message is what the user sees.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("An account with this email already exists.")]
    EmailAlreadyInUse,
    #[error("Invalid email address.")]
    InvalidEmail,
    #[error("The password is too weak.")]
    WeakPassword,
    #[error("Please sign in again before deleting your account.")]
    RequiresRecentAuthentication,
    #[error("There is no signed-in account.")]
    NotFound,
    #[error("Authentication failed: {0}")]
    Unknown(String),
}

/// Remote user store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error("user store permission denied: {0}")]
    PermissionDenied(String),
    #[error("malformed user record: {0}")]
    Malformed(String),
}

/// Failures of user-initiated profile operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("no signed-in profile")]
    NoActiveProfile,
    #[error("profile {requested} does not belong to the signed-in user")]
    IdentityMismatch { requested: String },
    #[error("the name {0:?} is already taken")]
    NameTaken(String),
    #[error("invalid profile: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Please fill in both email and password.")]
    MissingCredentials,
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}
