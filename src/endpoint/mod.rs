//! Endpoint execution pipeline.
//!
//! Every invocation moves through fixed stages:
//!
//! ```text
//! validate -> [authenticate -> authorize] -> execute
//! ```
//!
//! The bracketed stages only run for protected endpoints. A failure in any
//! stage goes to the error stage. That stage logs the error (unless it is
//! handled and handled-error logging is off) and then passes it to the
//! endpoint's [`ErrorHandler`]. Whatever the handler returns is the result of
//! the call.

pub mod handler;

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::auth::{Authenticator, Authorizer, GroupAuthorizer};
use crate::error::{GateError, GateResult};
use crate::logging::{should_log, ErrorLogger, TracingErrorLogger};
use crate::models::User;
use crate::validation::{Schema, SchemaValidator, ValidateFn, Validator};

pub use handler::{ErrorHandler, HandlerFn, Propagate, RespondWithJson};

type Logic<T> = Arc<dyn Fn(Value) -> BoxFuture<'static, GateResult<T>> + Send + Sync>;
type ProtectedLogic<T> = Arc<dyn Fn(Value, User, String) -> BoxFuture<'static, GateResult<T>> + Send + Sync>;

/// Shared collaborators for building endpoints
#[derive(Clone)]
pub struct EndpointPipeline {
    validator: Arc<dyn Validator>,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Arc<dyn Authorizer>,
    logger: Arc<dyn ErrorLogger>,
    is_log_handled_errors: bool,
}

impl Default for EndpointPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointPipeline {
    pub fn new() -> Self {
        Self {
            validator: Arc::new(SchemaValidator::new()),
            authenticator: None,
            authorizer: Arc::new(GroupAuthorizer::new()),
            logger: Arc::new(TracingErrorLogger),
            is_log_handled_errors: true,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn log_handled_errors(mut self, enabled: bool) -> Self {
        self.is_log_handled_errors = enabled;
        self
    }

    fn error_stage<T: Send + 'static>(&self) -> ErrorStage<T> {
        ErrorStage {
            logger: self.logger.clone(),
            is_log_handled_errors: self.is_log_handled_errors,
            handler: Arc::new(Propagate),
        }
    }

    /// Build an unauthenticated endpoint. The schema is compiled once, here.
    pub fn wrap<T, F, Fut>(&self, schema: &Schema, logic: F) -> GateResult<Endpoint<T>>
    where
        T: Send + 'static,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GateResult<T>> + Send + 'static,
    {
        let validate = self.validator.compile(schema)?;
        let logic: Logic<T> = Arc::new(move |data| logic(data).boxed());

        Ok(Endpoint {
            name: "endpoint".to_string(),
            validate,
            logic,
            errors: self.error_stage(),
        })
    }

    /// Build an endpoint that requires a bearer token whose user holds one of
    /// `allowed_groups`. The business logic receives the validated payload,
    /// the user and the group the request is attributed to.
    pub fn protect<T, F, Fut, G, S>(&self, schema: &Schema, allowed_groups: G, logic: F) -> GateResult<ProtectedEndpoint<T>>
    where
        T: Send + 'static,
        F: Fn(Value, User, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GateResult<T>> + Send + 'static,
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authenticator = self
            .authenticator
            .clone()
            .ok_or_else(|| GateError::configuration("protected endpoints require an authenticator"))?;
        let validate = self.validator.compile(schema)?;
        let logic: ProtectedLogic<T> = Arc::new(move |data, user, group| logic(data, user, group).boxed());

        Ok(ProtectedEndpoint {
            name: "endpoint".to_string(),
            validate,
            authenticator,
            authorizer: self.authorizer.clone(),
            allowed_groups: allowed_groups.into_iter().map(Into::into).collect(),
            logic,
            errors: self.error_stage(),
        })
    }
}

struct ErrorStage<T> {
    logger: Arc<dyn ErrorLogger>,
    is_log_handled_errors: bool,
    handler: Arc<dyn ErrorHandler<T>>,
}

impl<T> Clone for ErrorStage<T> {
    fn clone(&self) -> Self {
        Self {
            logger: self.logger.clone(),
            is_log_handled_errors: self.is_log_handled_errors,
            handler: self.handler.clone(),
        }
    }
}

impl<T: Send + 'static> ErrorStage<T> {
    async fn handle(&self, endpoint: &str, mut error: GateError, payload: &Value) -> GateResult<T> {
        tracing::debug!("{}: failed with {} ({:?})", endpoint, error.code(), error.kind);
        if should_log(&error, self.is_log_handled_errors) {
            self.logger.log(&mut error);
        }
        self.handler.handle(error, payload).await
    }
}

/// Callable unauthenticated endpoint
pub struct Endpoint<T> {
    name: String,
    validate: ValidateFn,
    logic: Logic<T>,
    errors: ErrorStage<T>,
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            validate: self.validate.clone(),
            logic: self.logic.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl<T: Send + 'static> Endpoint<T> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler<T> + 'static) -> Self {
        self.errors.handler = Arc::new(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, payload: Value) -> GateResult<T> {
        match self.run(payload.clone()).await {
            Ok(output) => Ok(output),
            Err(error) => self.errors.handle(&self.name, error, &payload).await,
        }
    }

    async fn run(&self, payload: Value) -> GateResult<T> {
        tracing::trace!("{}: validating", self.name);
        let data = (self.validate)(payload)?;

        tracing::trace!("{}: executing", self.name);
        (self.logic)(data).await
    }
}

/// Callable endpoint guarded by authentication and group authorization
pub struct ProtectedEndpoint<T> {
    name: String,
    validate: ValidateFn,
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn Authorizer>,
    allowed_groups: Vec<String>,
    logic: ProtectedLogic<T>,
    errors: ErrorStage<T>,
}

impl<T> Clone for ProtectedEndpoint<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            validate: self.validate.clone(),
            authenticator: self.authenticator.clone(),
            authorizer: self.authorizer.clone(),
            allowed_groups: self.allowed_groups.clone(),
            logic: self.logic.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl<T: Send + 'static> ProtectedEndpoint<T> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler<T> + 'static) -> Self {
        self.errors.handler = Arc::new(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allowed_groups(&self) -> &[String] {
        &self.allowed_groups
    }

    pub async fn call(&self, payload: Value, token: Option<&str>) -> GateResult<T> {
        match self.run(payload.clone(), token).await {
            Ok(output) => Ok(output),
            Err(error) => self.errors.handle(&self.name, error, &payload).await,
        }
    }

    async fn run(&self, payload: Value, token: Option<&str>) -> GateResult<T> {
        tracing::trace!("{}: validating", self.name);
        let data = (self.validate)(payload)?;

        tracing::trace!("{}: authenticating", self.name);
        let mut user = self.authenticator.authenticate(token).await?;
        user.token = token.map(str::to_string);

        tracing::trace!("{}: authorizing user {}", self.name, user.id);
        let group = self.authorizer.authorize(&user, &self.allowed_groups).await?;

        tracing::trace!("{}: executing as '{}'", self.name, group);
        (self.logic)(data, user, group).await
    }
}
