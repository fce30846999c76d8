//! Error types for the convergence harness

use std::time::Duration;

use thiserror::Error;

/// Error variants are named the way the harness reports them (e.g. `NotFound`,
/// `Verification`, `Timeout`), so a failed scenario reads naturally in logs.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Conflict updating {kind} {name}: object was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error(
        "Timed out after {:?} waiting for {} ({} attempts){}",
        .waited,
        .what,
        .attempts,
        last_error_suffix(.last_error)
    )]
    Timeout {
        what: String,
        waited: Duration,
        attempts: u32,
        last_error: Option<Box<Error>>,
    },

    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn last_error_suffix(last_error: &Option<Box<Error>>) -> String {
    match last_error {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Check if this error means "not converged yet" rather than "broken"
    ///
    /// Used as the default classification when a probe error is handed to the
    /// poller without an explicit transient/fatal decision.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    let code = api_err.code;
                    // 4xx are caller mistakes except absent objects, write races and throttling
                    if (400..500).contains(&code) {
                        return code == 404 || code == 409 || code == 429;
                    }
                    true
                }
                // Transport hiccups resolve on their own
                kube::Error::HyperError(_) | kube::Error::Service(_) => true,
                // Undecodable bodies, auth and request building do not
                _ => false,
            },
            Error::NotFound { .. } => true,
            Error::Conflict { .. } => true,
            Error::AlreadyExists { .. } => false,
            Error::SerializationError(_) => false,
            Error::MalformedResponse(_) => false,
            Error::Verification(_) => false,
            Error::Timeout { .. } => false,
            Error::PreconditionUnmet(_) => false,
            Error::InvalidConfig(_) => false,
        }
    }

    /// Check if this error reports an absent object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, Error::Verification(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A probe error already classified for the poller
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Keep polling; the error is remembered for the timeout report
    #[error("transient: {0}")]
    Transient(Error),

    /// Stop polling and return the error as is
    #[error("fatal: {0}")]
    Fatal(Error),
}

impl ProbeError {
    pub fn transient(error: impl Into<Error>) -> Self {
        ProbeError::Transient(error.into())
    }

    pub fn fatal(error: impl Into<Error>) -> Self {
        ProbeError::Fatal(error.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::Fatal(_))
    }

    pub fn into_inner(self) -> Error {
        match self {
            ProbeError::Transient(e) | ProbeError::Fatal(e) => e,
        }
    }
}

impl From<Error> for ProbeError {
    fn from(error: Error) -> Self {
        if error.is_transient() {
            ProbeError::Transient(error)
        } else {
            ProbeError::Fatal(error)
        }
    }
}
