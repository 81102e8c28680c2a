pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod localization;
pub mod logging;
pub mod models;
pub mod server;
pub mod validation;

use std::sync::Arc;

pub use auth::{Authenticator, Authorizer, GroupAuthorizer, TokenStore};
pub use cache::{Cache, MemoryCache};
pub use config::GateConfig;
pub use crypto::PasswordHashPool;
pub use endpoint::{Endpoint, EndpointPipeline, ErrorHandler, HandlerFn, Propagate, ProtectedEndpoint, RespondWithJson};
pub use error::{ErrorKind, GateError, GateResult};
pub use localization::{MapTranslator, Translator};
pub use logging::{ErrorLogger, TracingErrorLogger};
pub use models::{User, UserId};
pub use validation::{FieldKind, Schema, SchemaValidator, Validator};

/// Collaborators to wire into a [`Gatehouse`]. Every port has a default.
pub struct GatehouseBuilder {
    config: GateConfig,
    cache: Option<Arc<dyn Cache>>,
    validator: Option<Arc<dyn Validator>>,
    logger: Option<Arc<dyn ErrorLogger>>,
    translator: Option<Arc<dyn Translator>>,
}

impl GatehouseBuilder {
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Validate the configuration, wire the gates and start the hash workers
    pub async fn setup(self) -> GateResult<Gatehouse> {
        self.config.validate()?;

        let cache = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let tokens = Arc::new(TokenStore::new(cache, &self.config));

        let mut pipeline = EndpointPipeline::new()
            .with_authenticator(tokens.clone())
            .with_authorizer(Arc::new(GroupAuthorizer::new()))
            .log_handled_errors(self.config.is_log_handled_errors);
        if let Some(validator) = self.validator {
            pipeline = pipeline.with_validator(validator);
        }
        if let Some(logger) = self.logger {
            pipeline = pipeline.with_logger(logger);
        }

        let translator = self
            .translator
            .unwrap_or_else(|| Arc::new(MapTranslator::new("en")));

        let password_hasher = PasswordHashPool::start(&self.config)?;

        tracing::info!(
            "Gatehouse ready ({}..{} password workers, tokens expire after {} minutes)",
            password_hasher.min_workers(),
            password_hasher.max_workers(),
            self.config.user_token_expires_in_minutes
        );

        Ok(Gatehouse {
            config: Arc::new(self.config),
            tokens,
            pipeline,
            password_hasher,
            translator,
        })
    }
}

/// A configured toolkit instance. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Gatehouse {
    config: Arc<GateConfig>,
    tokens: Arc<TokenStore>,
    pipeline: EndpointPipeline,
    password_hasher: PasswordHashPool,
    translator: Arc<dyn Translator>,
}

impl Gatehouse {
    pub fn builder(config: GateConfig) -> GatehouseBuilder {
        GatehouseBuilder {
            config,
            cache: None,
            validator: None,
            logger: None,
            translator: None,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn pipeline(&self) -> &EndpointPipeline {
        &self.pipeline
    }

    pub fn password_hasher(&self) -> &PasswordHashPool {
        &self.password_hasher
    }

    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    /// Drain and stop the password workers. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.password_hasher.shutdown().await;
        tracing::info!("Gatehouse shut down");
    }
}
