use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{GateError, GateResult};
use crate::localization::Translator;

/// Final stage of a failed endpoint call. Its result replaces the failure:
/// return `Ok` to answer with a value, or `Err` to fail the call.
///
/// `payload` is the raw payload the endpoint was called with, before
/// validation.
#[async_trait]
pub trait ErrorHandler<T>: Send + Sync {
    async fn handle(&self, error: GateError, payload: &Value) -> GateResult<T>;
}

/// Default handler: the error becomes the caller's error
#[derive(Debug, Default, Clone, Copy)]
pub struct Propagate;

#[async_trait]
impl<T: Send + 'static> ErrorHandler<T> for Propagate {
    async fn handle(&self, error: GateError, _payload: &Value) -> GateResult<T> {
        Err(error)
    }
}

/// Adapts a plain closure into an [`ErrorHandler`]
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<T, F> ErrorHandler<T> for HandlerFn<F>
where
    T: Send + 'static,
    F: Fn(GateError, &Value) -> GateResult<T> + Send + Sync,
{
    async fn handle(&self, error: GateError, payload: &Value) -> GateResult<T> {
        (self.0)(error, payload)
    }
}

/// Turns every failure into its client-safe JSON body, so the endpoint
/// never fails. With a translator, handled errors also get a `message`.
#[derive(Clone, Default)]
pub struct RespondWithJson {
    translator: Option<Arc<dyn Translator>>,
    language: String,
}

impl RespondWithJson {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translated(translator: Arc<dyn Translator>, language: impl Into<String>) -> Self {
        Self {
            translator: Some(translator),
            language: language.into(),
        }
    }
}

#[async_trait]
impl ErrorHandler<Value> for RespondWithJson {
    async fn handle(&self, error: GateError, _payload: &Value) -> GateResult<Value> {
        let mut body = error.to_client_json();

        if error.is_handled {
            let message = self
                .translator
                .as_ref()
                .zip(error.translation_key.as_deref())
                .and_then(|(translator, key)| translator.translate(key, &self.language));
            if let Some(message) = message {
                body["message"] = json!(message);
            }
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::MapTranslator;

    #[tokio::test]
    async fn test_propagate_returns_error() {
        let result: GateResult<u32> = Propagate.handle(GateError::internal("x"), &Value::Null).await;
        assert_eq!(result.unwrap_err().message, "x");
    }

    #[tokio::test]
    async fn test_respond_with_json_translates_handled_errors() {
        let translator = Arc::new(MapTranslator::new("en").with("en", "token not found", "Please log in"));
        let handler = RespondWithJson::translated(translator, "de");

        let body = handler
            .handle(GateError::authentication("authentication: token not found", "token not found"), &Value::Null)
            .await
            .unwrap();
        assert_eq!(body["message"], "Please log in");
        assert_eq!(body["code"], "UNAUTHORIZED");

        let body = handler.handle(GateError::internal("secret detail"), &Value::Null).await.unwrap();
        assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn test_handler_fn_sees_the_payload() {
        let handler = HandlerFn(|error: GateError, payload: &Value| {
            Ok::<_, GateError>(json!({ "failed": error.message, "name": payload["name"] }))
        });
        let body = handler
            .handle(GateError::internal("boom"), &json!({"name": "joggl"}))
            .await
            .unwrap();
        assert_eq!(body, json!({"failed": "boom", "name": "joggl"}));
    }
}
