//! Infoblox client errors

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when interacting with the Infoblox WAPI
#[derive(Debug, Error)]
pub enum InfobloxError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WAPI returned an error
    #[error("Infoblox API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, rejected client certificate)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., malformed CIDR)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client configuration is unusable (missing credentials, unreadable CA bundle)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend accepted a mutation but the result does not contain what was asked for
    #[error("Allocation inconsistent: {0}")]
    AllocationInconsistent(String),

    /// Error wrapped with the operation it happened in
    #[error("{context}: {source}")]
    Context {
        /// Operation description
        context: String,
        /// Underlying error
        #[source]
        source: Box<InfobloxError>,
    },
}

impl InfobloxError {
    /// Whether this error (or the error it wraps) means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) is an authentication failure
    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Authentication(_) => true,
            Self::Context { source, .. } => source.is_authentication(),
            _ => false,
        }
    }

    /// Wrap with a description of the failed operation
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify a non-success WAPI response
    ///
    /// WAPI error bodies look like
    /// `{"Error": "AdmConDataNotFoundError: ...", "code": "Client.Ibap.Data.NotFound", "text": "..."}`.
    /// The `code` decides when present; bodies without one fall back to the message suffix.
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Self::Authentication(format!("{} - {}", status, body));
        }
        if status == StatusCode::NOT_FOUND {
            return Self::NotFound(body.to_string());
        }

        let parsed: Option<WapiErrorBody> = serde_json::from_str(body).ok();
        let text = parsed
            .as_ref()
            .and_then(|p| p.text.clone().or_else(|| p.error.clone()))
            .unwrap_or_else(|| body.to_string());

        let not_found = match parsed.as_ref().and_then(|p| p.code.as_deref()) {
            Some(code) => code.contains("NotFound"),
            None => text.trim_end().to_ascii_lowercase().ends_with("not found"),
        };
        if not_found {
            return Self::NotFound(text);
        }
        Self::Api(format!("{} - {}", status, text))
    }
}

#[derive(Debug, Deserialize)]
struct WapiErrorBody {
    #[serde(rename = "Error", default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Attach operation context to client results
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `context`
    fn context(self, context: impl Into<String>) -> Result<T, InfobloxError>;

    /// Like [`ResultExt::context`], building the message lazily
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, InfobloxError>;
}

impl<T> ResultExt<T> for Result<T, InfobloxError> {
    fn context(self, context: impl Into<String>) -> Result<T, InfobloxError> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, InfobloxError> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_from_code() {
        let body = r#"{"Error": "AdmConDataNotFoundError: Reference record:host/abc not found", "code": "Client.Ibap.Data.NotFound", "text": "Reference record:host/abc not found"}"#;
        let err = InfobloxError::from_response(StatusCode::BAD_REQUEST, body);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_code_takes_precedence_over_text() {
        let body = r#"{"Error": "AdmConProtoError: x", "code": "Client.Ibap.Proto", "text": "Field view not found"}"#;
        let err = InfobloxError::from_response(StatusCode::BAD_REQUEST, body);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_suffix_fallback() {
        let err = InfobloxError::from_response(StatusCode::BAD_REQUEST, "network view lab not found");
        assert!(err.is_not_found());

        let err = InfobloxError::from_response(StatusCode::BAD_REQUEST, "Cannot find 1 available IP address(es) in this network");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_auth_status() {
        let err = InfobloxError::from_response(StatusCode::UNAUTHORIZED, "Authorization Required");
        assert!(err.is_authentication());
    }

    #[test]
    fn test_context_preserves_class() {
        let err = InfobloxError::NotFound("record:host".to_string())
            .context("failed to get host record")
            .context("failed to release address");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "failed to release address: failed to get host record: Not found: record:host"
        );
    }
}
