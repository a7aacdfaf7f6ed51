//! Collaborator interfaces the core consumes.
//!
//! Accounts, operator credentials, and persistence are app-level concerns;
//! the core talks to them through these traits. The bundled implementations
//! are config/in-memory backed — enough to run a standalone server and to
//! drive tests — and a deployment may substitute database-backed ones.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::sasl::ScramCredentials;
use parking_lot::RwLock;

use crate::security::password;

/// Account lookup and validation.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Verify `(name, password)`; failures and unknown accounts are
    /// indistinguishable to the caller.
    async fn validate(&self, name: &str, password: &str) -> bool;

    /// Resolve an account bound to a certificate fingerprint (normalized
    /// uppercase hex, no colons).
    async fn lookup_by_fingerprint(&self, fingerprint: &str) -> Option<String>;

    /// Stored SCRAM credentials for an account, when provisioned.
    async fn scram_credentials(&self, name: &str) -> Option<ScramCredentials>;

    /// Record activity on an account. Fire-and-forget.
    async fn update_last_seen(&self, name: &str);
}

/// One operator block resolved from configuration.
#[derive(Debug, Clone)]
pub struct OperatorBlock {
    pub name: String,
    /// Argon2id PHC string.
    pub hashed_pass: String,
    /// Hostmasks the oper may authenticate from (`*!*@*` forms).
    pub hostmasks: Vec<String>,
}

/// Operator credential store.
pub trait OperatorStore: Send + Sync {
    fn get(&self, name: &str) -> Option<OperatorBlock>;
}

/// Optional fire-and-forget persistence notifications.
#[async_trait]
pub trait PersistenceHooks: Send + Sync {
    async fn on_channel_register(&self, _channel: &str) {}
    async fn on_channel_drop(&self, _channel: &str) {}
}

/// No-op hooks used when no persistence layer is attached.
pub struct NullHooks;

#[async_trait]
impl PersistenceHooks for NullHooks {}

/// In-memory account service seeded from configuration.
///
/// Passwords are Argon2id PHC strings; SCRAM credentials and certificate
/// bindings are optional per account.
#[derive(Default)]
pub struct MemoryAccountService {
    accounts: RwLock<HashMap<String, MemoryAccount>>,
}

struct MemoryAccount {
    password_hash: String,
    certfp: Option<String>,
    scram: Option<ScramCredentials>,
}

impl MemoryAccountService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account with a pre-hashed password.
    pub fn add_account(
        &self,
        name: &str,
        password_hash: String,
        certfp: Option<String>,
        scram: Option<ScramCredentials>,
    ) {
        self.accounts.write().insert(
            loom_proto::irc_to_lower(name),
            MemoryAccount {
                password_hash,
                certfp,
                scram,
            },
        );
    }
}

#[async_trait]
impl AccountService for MemoryAccountService {
    async fn validate(&self, name: &str, password: &str) -> bool {
        let hash = {
            let accounts = self.accounts.read();
            match accounts.get(&loom_proto::irc_to_lower(name)) {
                Some(acct) => acct.password_hash.clone(),
                None => return false,
            }
        };
        password::verify_password(password.to_string(), hash)
            .await
            .unwrap_or(false)
    }

    async fn lookup_by_fingerprint(&self, fingerprint: &str) -> Option<String> {
        let accounts = self.accounts.read();
        accounts
            .iter()
            .find(|(_, acct)| acct.certfp.as_deref() == Some(fingerprint))
            .map(|(name, _)| name.clone())
    }

    async fn scram_credentials(&self, name: &str) -> Option<ScramCredentials> {
        let accounts = self.accounts.read();
        accounts
            .get(&loom_proto::irc_to_lower(name))
            .and_then(|acct| acct.scram.clone())
    }

    async fn update_last_seen(&self, _name: &str) {}
}

/// Operator store backed by config blocks.
pub struct ConfigOperatorStore {
    blocks: Vec<OperatorBlock>,
}

impl ConfigOperatorStore {
    pub fn new(blocks: Vec<OperatorBlock>) -> Self {
        Self { blocks }
    }
}

impl OperatorStore for ConfigOperatorStore {
    fn get(&self, name: &str) -> Option<OperatorBlock> {
        self.blocks
            .iter()
            .find(|b| loom_proto::irc_eq(&b.name, name))
            .cloned()
    }
}

/// Shared handles to all collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountService>,
    pub operators: Arc<dyn OperatorStore>,
    pub hooks: Arc<dyn PersistenceHooks>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_accounts_validate() {
        let svc = MemoryAccountService::new();
        let hash = password::hash_password("hunter2".into()).await.unwrap();
        svc.add_account("alice", hash, Some("ABCD".into()), None);

        assert!(svc.validate("alice", "hunter2").await);
        assert!(svc.validate("ALICE", "hunter2").await);
        assert!(!svc.validate("alice", "wrong").await);
        assert!(!svc.validate("nobody", "hunter2").await);

        assert_eq!(
            svc.lookup_by_fingerprint("ABCD").await,
            Some("alice".into())
        );
        assert_eq!(svc.lookup_by_fingerprint("FFFF").await, None);
    }

    #[test]
    fn operator_store_is_fold_insensitive() {
        let store = ConfigOperatorStore::new(vec![OperatorBlock {
            name: "Root".into(),
            hashed_pass: "x".into(),
            hostmasks: vec!["*!*@*".into()],
        }]);
        assert!(store.get("root").is_some());
        assert!(store.get("other").is_none());
    }
}
