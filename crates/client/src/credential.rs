// Bearer credential source: env override, then the OS keychain.

use anyhow::{bail, Context, Result};

const KEYRING_SERVICE: &str = "dev.notesync.client";
const TOKEN_ACCOUNT: &str = "bearer_token";

/// Environment variable that overrides the stored token.
pub const TOKEN_ENV_VAR: &str = "NOTESYNC_TOKEN";

/// Supplies the bearer token for REST and websocket requests.
///
/// `Ok(None)` means no credential is stored, which callers surface as a
/// missing-credential error rather than a failure of the source itself.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Result<Option<String>>;
}

/// Fixed token, used for `--token` and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: normalize(token.into()) }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

impl CredentialSource for StaticCredentials {
    fn bearer_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Locally persisted token: `NOTESYNC_TOKEN` if set, else the keychain entry.
pub struct KeychainCredentials {
    store: Box<dyn SecretStore>,
    env: fn(&str) -> Result<String, std::env::VarError>,
}

impl KeychainCredentials {
    pub fn new() -> Self {
        Self { store: Box::new(KeyringSecretStore), env: |key| std::env::var(key) }
    }
}

impl Default for KeychainCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for KeychainCredentials {
    fn bearer_token(&self) -> Result<Option<String>> {
        if let Some(token) = (self.env)(TOKEN_ENV_VAR).ok().and_then(normalize) {
            return Ok(Some(token));
        }
        Ok(get_token_with_store(self.store.as_ref())?.and_then(normalize))
    }
}

pub fn store_token(value: &str) -> Result<()> {
    set_token_with_store(&KeyringSecretStore, value)
}

pub fn clear_token() -> Result<()> {
    delete_token_with_store(&KeyringSecretStore)
}

fn normalize(token: String) -> Option<String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

trait SecretStore: Send + Sync {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()>;
    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>>;
    fn delete_secret(&self, service: &str, account: &str) -> Result<()>;
}

struct KeyringSecretStore;

impl SecretStore for KeyringSecretStore {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        entry.set_password(value).context("failed to write keychain entry")?;
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(error).context("failed to read keychain entry"),
        }
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(error).context("failed to delete keychain entry"),
        }
    }
}

fn set_token_with_store(store: &dyn SecretStore, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("token must not be empty");
    }
    store
        .set_secret(KEYRING_SERVICE, TOKEN_ACCOUNT, value.trim())
        .context("failed to persist bearer token in keychain")
}

fn get_token_with_store(store: &dyn SecretStore) -> Result<Option<String>> {
    store
        .get_secret(KEYRING_SERVICE, TOKEN_ACCOUNT)
        .context("failed to read bearer token from keychain")
}

fn delete_token_with_store(store: &dyn SecretStore) -> Result<()> {
    store
        .delete_secret(KEYRING_SERVICE, TOKEN_ACCOUNT)
        .context("failed to clear bearer token from keychain")
}
