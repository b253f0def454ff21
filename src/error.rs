use thiserror::Error;
use uuid::Uuid;

use crate::permissions::Permission;

/// Problems caught before a draft reaches the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("an incident must involve at least one student")]
    NoStudents,
    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("file \"{name}\" is too large ({size} bytes, max {max} bytes)")]
    TooLarge { name: String, size: u64, max: u64 },
    #[error("could not read \"{name}\": {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Roster files either parse or fail as a whole.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed roster file: {0}")]
    Malformed(String),
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Malformed(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("store request failed: {0}")]
    Store(#[from] sqlx::Error),
    #[error("no {collection} record with id {id}")]
    NotFound { collection: &'static str, id: Uuid },
    #[error("stored {field} value is invalid: {value}")]
    Corrupt { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    AlreadyRegistered(String),
    #[error("email domain of {0} is not allowed to register")]
    DomainNotAllowed(String),
    #[error("no profile found for account {0}")]
    MissingProfile(Uuid),
    #[error("not signed in")]
    NotSignedIn,
    #[error("session file: {0}")]
    SessionFile(String),
    #[error("missing permission: {0}")]
    Forbidden(Permission),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Gateway(GatewayError::Store(err))
    }
}
