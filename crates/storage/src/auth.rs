//! OAuth token access
//!
//! The redirect/capture flow lives outside this crate; adapters only ever
//! see a provider of already-obtained bearer tokens. Tokens are held as
//! `SecretString` and exposed at header-construction time only.

use secrecy::SecretString;

/// Source of the per-provider OAuth token, typically backed by durable
/// client-side storage. An absent token is surfaced as `AuthError` by the
/// adapters; no retry is attempted.
pub trait TokenProvider: Send + Sync {
    /// Current token, if one is available.
    fn bearer(&self) -> Option<SecretString>;
}

/// Fixed in-memory token, for tests and embedding scenarios where the
/// host application manages token lifetime itself.
pub struct StaticTokens {
    token: SecretString,
}

impl StaticTokens {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
        }
    }
}

impl TokenProvider for StaticTokens {
    fn bearer(&self) -> Option<SecretString> {
        Some(self.token.clone())
    }
}

/// Provider that never has a token. Every authenticated call fails fast.
pub struct NoTokens;

impl TokenProvider for NoTokens {
    fn bearer(&self) -> Option<SecretString> {
        None
    }
}
