// Endpoint error types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// Closed set of failure categories the toolkit produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // 400 Bad Request
    Validation,

    // 401 Unauthorized
    Authentication,
    Authorization,

    // 500 Internal Server Error
    Internal,
    Configuration,
}

impl ErrorKind {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 401,
            ErrorKind::Internal => 500,
            ErrorKind::Configuration => 500,
        }
    }

    /// Get the stable code exposed to clients
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "BAD_REQUEST",
            ErrorKind::Authentication => "UNAUTHORIZED",
            ErrorKind::Authorization => "UNAUTHORIZED",
            ErrorKind::Internal => "INTERNAL_SERVER_ERROR",
            ErrorKind::Configuration => "INTERNAL_SERVER_ERROR",
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;

/// Error value carried through the endpoint pipeline.
///
/// `message` is diagnostic text for the server log. Clients only ever see
/// the output of [`GateError::to_client_json`].
#[derive(Debug, Clone)]
pub struct GateError {
    pub kind: ErrorKind,
    pub message: String,
    pub is_handled: bool,
    pub translation_key: Option<String>,
    pub data: Option<Value>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub log_id: Option<String>,
}

impl GateError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            is_handled: false,
            translation_key: None,
            data: None,
            source: None,
            log_id: None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.error_code()
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Convert to the client-facing JSON body.
    ///
    /// Handled errors expose their code and translation key. Unhandled ones
    /// collapse to the generic code plus the log id for support lookups.
    pub fn to_client_json(&self) -> Value {
        if self.is_handled {
            let mut body = json!({
                "error": true,
                "code": self.code(),
            });
            if let Some(key) = &self.translation_key {
                body["translationKey"] = json!(key);
            }
            body
        } else {
            let mut body = json!({
                "error": true,
                "code": ErrorKind::Internal.error_code(),
            });
            if let Some(log_id) = &self.log_id {
                body["logId"] = json!(log_id);
            }
            body
        }
    }
}

// Static constructor methods
impl GateError {
    pub fn validation(message: impl Into<String>, translation_key: impl Into<String>) -> Self {
        GateError::new(ErrorKind::Validation, message)
            .handled()
            .with_translation_key(translation_key)
    }

    pub fn authentication(message: impl Into<String>, translation_key: impl Into<String>) -> Self {
        GateError::new(ErrorKind::Authentication, message)
            .handled()
            .with_translation_key(translation_key)
    }

    pub fn authorization(message: impl Into<String>, translation_key: impl Into<String>) -> Self {
        GateError::new(ErrorKind::Authorization, message)
            .handled()
            .with_translation_key(translation_key)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GateError::new(ErrorKind::Internal, message)
    }

    /// Wrap an unexpected failure, keeping the original as `source`
    pub fn internal_from<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut error = GateError::new(ErrorKind::Internal, message);
        error.source = Some(Arc::new(source));
        error
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        GateError::new(ErrorKind::Configuration, message)
    }

    pub fn handled(mut self) -> Self {
        self.is_handled = true;
        self
    }

    pub fn with_translation_key(mut self, key: impl Into<String>) -> Self {
        self.translation_key = Some(key.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let source: Box<dyn std::error::Error + Send + Sync> = err.into();
        let mut error = GateError::internal(message);
        error.source = Some(Arc::from(source));
        error
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::internal_from(format!("JSON error: {}", err), err)
    }
}

impl From<crate::config::ConfigError> for GateError {
    fn from(err: crate::config::ConfigError) -> Self {
        let mut error = GateError::configuration(err.to_string());
        error.source = Some(Arc::new(err));
        error
    }
}

// Standard error trait implementations
impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// Automatic HTTP response conversion for Axum
impl IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_client_json())).into_response()
    }
}
