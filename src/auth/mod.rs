pub mod authorization;
pub mod session;

use async_trait::async_trait;

use crate::error::GateResult;
use crate::models::User;

pub use authorization::GroupAuthorizer;
pub use session::TokenStore;

/// Resolves the bearer token of a request into an identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: Option<&str>) -> GateResult<User>;
}

/// Decides whether an authenticated identity may run an endpoint.
/// Returns the group the request is attributed to.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, user: &User, allowed_groups: &[String]) -> GateResult<String>;
}
