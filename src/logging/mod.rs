use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::error::GateError;

/// Receives every error that reaches the endpoint pipeline's error stage.
/// Implementations must not fail.
pub trait ErrorLogger: Send + Sync {
    fn log(&self, error: &mut GateError);
}

/// Whether an error should reach the logger at all
pub fn should_log(error: &GateError, is_log_handled_errors: bool) -> bool {
    is_log_handled_errors || !error.is_handled
}

/// Identifier correlating a client-visible error with its server log entry
pub fn new_log_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{}", millis, Uuid::new_v4().simple())
}

/// Default logger: assigns a log id and emits a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLogger;

impl ErrorLogger for TracingErrorLogger {
    fn log(&self, error: &mut GateError) {
        let log_id = new_log_id();
        let source = error.source.as_ref().map(|s| s.to_string());

        if error.is_handled {
            tracing::warn!(
                log_id = %log_id,
                code = error.code(),
                status = error.status_code(),
                translation_key = error.translation_key.as_deref(),
                "{}",
                error.message
            );
        } else {
            tracing::error!(
                log_id = %log_id,
                code = error.code(),
                status = error.status_code(),
                source = source.as_deref(),
                "{}",
                error.message
            );
        }

        error.log_id = Some(log_id);
    }
}

/// Install the fmt subscriber, honouring `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_log_rules() {
        let handled = GateError::validation("validation error", "bad");
        let unhandled = GateError::internal("boom");

        assert!(should_log(&handled, true));
        assert!(!should_log(&handled, false));
        assert!(should_log(&unhandled, true));
        assert!(should_log(&unhandled, false));
    }

    #[test]
    fn test_tracing_logger_assigns_log_id() {
        let mut error = GateError::internal("boom");
        TracingErrorLogger.log(&mut error);
        let log_id = error.log_id.expect("log id assigned");
        assert!(log_id.contains('-'));
    }
}
