use async_trait::async_trait;
use serde_json::json;

use crate::error::{GateError, GateResult};
use crate::models::User;

use super::Authorizer;

/// Group-membership authorizer.
///
/// The user's own group order decides which group a request is attributed
/// to when several qualify.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupAuthorizer;

impl GroupAuthorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, user: &User, allowed_groups: &[String]) -> GateResult<String> {
        user.groups
            .iter()
            .find(|group| allowed_groups.contains(group))
            .cloned()
            .ok_or_else(|| {
                GateError::authorization(
                    format!(
                        "authorization: user with id \"{}\" has none of the groups \"{}\" assigned",
                        user.id,
                        allowed_groups.join(",")
                    ),
                    "user has none of the requested user groups assigned",
                )
                .with_data(json!({
                    "userId": user.id,
                    "allowedGroups": allowed_groups,
                }))
            })
    }
}

#[async_trait]
impl Authorizer for GroupAuthorizer {
    async fn authorize(&self, user: &User, allowed_groups: &[String]) -> GateResult<String> {
        let matched = self.check(user, allowed_groups)?;
        tracing::debug!("User {} authorized as '{}'", user.id, matched);
        Ok(matched)
    }
}
