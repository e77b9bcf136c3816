//! Typed failure taxonomy shared by both provider adapters
//!
//! Adapters map HTTP status codes into these variants before anything
//! reaches the tree or session layers, so callers branch on meaning
//! rather than on provider wire formats.

use reqwest::StatusCode;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Missing, invalid, or expired OAuth token. Never retried here;
    /// re-authentication is the caller's problem.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The entry vanished out from under us.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry with that name already exists at the destination.
    #[error("name conflict: {0}")]
    Conflict(String),

    /// The target resolves outside the application sandbox. Always a
    /// usage error; surfaced before any network request is issued.
    #[error("outside the application sandbox: {0}")]
    Containment(String),

    /// Provider-side storage quota exhausted.
    #[error("storage quota exceeded: {0}")]
    Quota(String),

    /// The entry is not an editable plain-text document.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Network failure or provider 5xx. Retryable by the caller.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A pending provider-side operation did not resolve within the poll
    /// ceiling. Never reported as success.
    #[error("operation still pending after {attempts} poll attempts")]
    Timeout { attempts: u32 },

    /// The caller abandoned the request. Not a user-visible error; the
    /// result must simply not be applied.
    #[error("request cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Map an HTTP response status onto the taxonomy.
    pub fn from_status(status: StatusCode, what: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{what}: HTTP {status}")),
            404 | 410 => Self::NotFound(format!("{what}: HTTP {status}")),
            409 => Self::Conflict(format!("{what}: HTTP {status}")),
            413 | 507 => Self::Quota(format!("{what}: HTTP {status}")),
            _ => Self::Transient(format!("{what}: HTTP {status}")),
        }
    }

    /// Whether the caller may reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            RemoteError::from_status(StatusCode::UNAUTHORIZED, "list"),
            RemoteError::Auth(_)
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::NOT_FOUND, "list"),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::CONFLICT, "create"),
            RemoteError::Conflict(_)
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::INSUFFICIENT_STORAGE, "upload"),
            RemoteError::Quota(_)
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::BAD_GATEWAY, "list"),
            RemoteError::Transient(_)
        ));
    }

    #[test]
    fn retryability() {
        assert!(RemoteError::Transient("x".into()).is_retryable());
        assert!(RemoteError::Timeout { attempts: 10 }.is_retryable());
        assert!(!RemoteError::Auth("x".into()).is_retryable());
        assert!(!RemoteError::Containment("x".into()).is_retryable());
    }
}
