use std::collections::HashMap;

use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{GateError, GateResult};
use crate::models::User;

/// Registered account: the identity plus its password hash record
#[derive(Debug, Clone)]
pub struct Account {
    pub user: User,
    pub password_record: String,
}

/// In-memory account store keyed by login name
#[derive(Debug, Default)]
pub struct UserDirectory {
    accounts: RwLock<HashMap<String, Account>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account under `name`. Ids are fresh UUIDs.
    pub async fn register(&self, name: &str, groups: Vec<String>, password_record: String) -> GateResult<User> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(name) {
            return Err(GateError::validation(
                format!("validation error: name \"{}\" is already registered", name),
                "name already registered",
            )
            .with_data(json!({ "field": "name" })));
        }

        let user = User::new(Uuid::new_v4(), groups);
        accounts.insert(
            name.to_string(),
            Account {
                user: user.clone(),
                password_record,
            },
        );
        Ok(user)
    }

    pub async fn find(&self, name: &str) -> Option<Account> {
        self.accounts.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_find() {
        let directory = UserDirectory::new();
        let user = directory
            .register("alice", vec!["user".into()], "record".into())
            .await
            .unwrap();

        let account = directory.find("alice").await.unwrap();
        assert_eq!(account.user, user);
        assert_eq!(account.password_record, "record");
        assert!(directory.find("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let directory = UserDirectory::new();
        directory.register("alice", vec![], "a".into()).await.unwrap();

        let err = directory.register("alice", vec![], "b".into()).await.unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
        assert_eq!(directory.len().await, 1);
    }
}
