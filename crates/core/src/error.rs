//! Error taxonomy (spec §7).
//!
//! Grounded on the provider-facing `LlmError` enum this workspace inherited
//! its HTTP-status mapping style from: a flat `thiserror` enum with a
//! `status_code`-style classifier, generalized here to the six kinds the
//! client-library contract (rather than a gateway's HTTP surface) needs.

use thiserror::Error;

/// The error taxonomy every `Provider` call returns through.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider rejected the request. Always surfaced to the caller.
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
        param: Option<String>,
    },

    /// HTTP failure, decode failure, or network error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request carried option combinations this adapter cannot encode.
    /// The call was NOT sent; the caller may retry after dropping the
    /// listed options. The prober downgrades this to a capability flag
    /// rather than treating it as a failed probe.
    #[error("unsupported option(s), call not sent: {0}")]
    UnsupportedContinuable(String),

    /// Indicates the environment, not the model, is misbehaving: cassette
    /// mismatch, unknown JSON field under strict mode, HTTP >= 500. Aborts
    /// probing rather than downgrading a capability flag.
    #[error("internal error: {0}")]
    BadInternal(String),

    /// No API key was found for this provider. The client is still
    /// constructed (inert) so callers can inspect it, e.g. to print the
    /// env var name to set.
    #[error("{provider} API key required (set {env_var})")]
    KeyRequired { provider: String, env_var: String },

    /// A capability this adapter does not implement, distinct from the
    /// remote backend rejecting it at request time.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Bad-internal errors abort scoreboard probing (spec §4.8 classification
    /// policy); every other kind is downgraded to a capability signal.
    pub fn is_bad_internal(&self) -> bool {
        matches!(self, Error::BadInternal(_))
    }

    /// True for the signal the prober treats as "feature absent/flaky"
    /// rather than a failed probe.
    pub fn is_unsupported_continuable(&self) -> bool {
        matches!(self, Error::UnsupportedContinuable(_))
    }

    /// Maps an HTTP status + provider error body to the taxonomy, the
    /// pattern repeated verbatim across every concrete adapter.
    pub fn from_http_status(provider: &str, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            500..=599 => Error::BadInternal(format!("{provider} returned {status}: {message}")),
            _ => Error::Api {
                provider: provider.to_string(),
                status,
                message,
                param: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_become_bad_internal() {
        let err = Error::from_http_status("anthropic", 503, "overloaded");
        assert!(err.is_bad_internal());
    }

    #[test]
    fn client_errors_become_api_errors() {
        let err = Error::from_http_status("openai", 429, "rate limited");
        assert!(!err.is_bad_internal());
        assert!(matches!(err, Error::Api { status: 429, .. }));
    }
}
