//! HTTP error-body decoding shared by every adapter (spec §4.3's "decode
//! either the success schema or the provider error schema" contract, §7's
//! error taxonomy).

use genai_core::Error;
use serde::Deserialize;

/// OpenAI-style `{"error": {"message", "type", "param", "code"}}` body,
/// also matched by every OpenAI-compatible backend (Groq, Together, ...).
#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetails {
    message: String,
    #[serde(default)]
    param: Option<String>,
}

/// Anthropic-style `{"type": "error", "error": {"type", "message"}}` body.
#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetails,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetails {
    message: String,
}

/// Decodes a non-success HTTP response body into a [`genai_core::Error`],
/// falling back to the raw body text when it matches neither known error
/// schema (spec §9's open question on the `detail` field: we always prefer
/// the canonical `message` field and never key off `detail`).
pub(crate) fn decode_api_error(provider: &str, status: u16, body: &str) -> Error {
    let openai_body = serde_json::from_str::<OpenAiErrorBody>(body).ok();

    let message = openai_body
        .as_ref()
        .map(|b| b.error.message.clone())
        .or_else(|| serde_json::from_str::<AnthropicErrorBody>(body).ok().map(|b| b.error.message))
        .unwrap_or_else(|| body.to_string());

    let error = Error::from_http_status(provider, status, message);

    match (error, openai_body.and_then(|b| b.error.param)) {
        (Error::Api { provider, status, message, .. }, param) => Error::Api {
            provider,
            status,
            message,
            param,
        },
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_openai_style_body() {
        let body = r#"{"error":{"message":"bad key","type":"invalid_request_error","param":"model"}}"#;
        let err = decode_api_error("openai", 400, body);
        match err {
            Error::Api {
                message, param, status, ..
            } => {
                assert_eq!(message, "bad key");
                assert_eq!(param.as_deref(), Some("model"));
                assert_eq!(status, 400);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_anthropic_style_body() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"no model"}}"#;
        let err = decode_api_error("anthropic", 404, body);
        assert!(matches!(err, Error::Api { message, .. } if message == "no model"));
    }

    #[test]
    fn server_errors_are_bad_internal() {
        let err = decode_api_error("openai", 503, "upstream down");
        assert!(err.is_bad_internal());
    }

    #[test]
    fn unparseable_body_falls_back_to_raw_text() {
        let err = decode_api_error("openai", 400, "not json");
        assert!(matches!(err, Error::Api { message, .. } if message == "not json"));
    }
}
