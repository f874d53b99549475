//! Persistent credential storage.
//!
//! This module provides a thread-safe store of login accounts. Each account
//! keeps a random salt and the hex-encoded SHA-256 digest of salt and
//! password; digests are compared in constant time. The store persists to
//! JSON at `<data_dir>/users.json`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::Authenticator;

/// A stored account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// Login name as sent in the auth line.
    pub login: String,
    /// Hex-encoded random salt. Empty for accounts written before salting.
    #[serde(default)]
    pub salt: String,
    /// Hex-encoded SHA-256 digest of salt and password.
    pub password_hash: String,
    /// When the account was created or last had its password set.
    pub created_at: SystemTime,
}

impl UserRecord {
    /// Creates a record, hashing the clear-text password.
    pub fn new(login: &str, password: &str) -> Self {
        let salt = generate_salt();
        Self {
            login: login.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            created_at: SystemTime::now(),
        }
    }

    /// Whether `password` is this account's password.
    pub fn matches(&self, password: &str) -> bool {
        let Ok(stored) = hex::decode(&self.password_hash) else {
            return false;
        };
        let candidate = salted_digest(&self.salt, password);
        candidate.as_ref().ct_eq(stored.as_slice()).into()
    }
}

const SALT_LEN: usize = 16;

fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt);
    hex::encode(salt)
}

fn salted_digest(salt: &str, password: &str) -> impl AsRef<[u8]> {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// Hex-encoded SHA-256 digest of `salt` followed by `password`.
pub fn hash_password(salt: &str, password: &str) -> String {
    hex::encode(salted_digest(salt, password))
}

/// Wrapper for serializing the credential store.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialStoreData {
    /// Version of the store format (for future migrations).
    version: u32,
    /// The accounts in the store.
    users: Vec<UserRecord>,
}

impl Default for CredentialStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            users: Vec::new(),
        }
    }
}

/// Thread-safe store for login accounts.
///
/// The store uses a `RwLock<HashMap>` for concurrent access and persists
/// to JSON for durability across restarts.
pub struct CredentialStore {
    /// The path to the JSON file.
    path: PathBuf,
    /// The accounts, keyed by login.
    users: RwLock<HashMap<String, UserRecord>>,
}

impl CredentialStore {
    /// Creates a new store that will persist to the given path.
    ///
    /// This does not load the file; call `load()` to read existing data.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store and loads it from `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the store from the JSON file.
    ///
    /// If the file does not exist, the store will be empty.
    /// If the file exists but is invalid, returns an error.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!(
                "Credential store not found at {:?}, starting empty",
                self.path
            );
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path).with_context(|| {
            format!("Failed to read credential store: {}", self.path.display())
        })?;

        let data: CredentialStoreData = serde_json::from_str(&contents).with_context(|| {
            format!("Failed to parse credential store: {}", self.path.display())
        })?;

        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on credential store"))?;

        users.clear();
        for user in data.users {
            users.insert(user.login.clone(), user);
        }

        tracing::info!("Loaded {} accounts from {:?}", users.len(), self.path);
        Ok(())
    }

    /// Saves the store to the JSON file.
    ///
    /// Uses atomic write (write to temp file, then rename) to prevent corruption.
    /// Creates parent directories if they don't exist.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create credential store directory: {}",
                    parent.display()
                )
            })?;
        }

        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on credential store"))?;

        let mut records: Vec<UserRecord> = users.values().cloned().collect();
        records.sort_by(|a, b| a.login.cmp(&b.login));
        let data = CredentialStoreData {
            users: records,
            ..Default::default()
        };

        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize credential store")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!(
                "Failed to write temp credential store: {}",
                temp_path.display()
            )
        })?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp credential store {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} accounts to {:?}", users.len(), self.path);
        Ok(())
    }

    /// Adds an account or replaces the password of an existing one.
    ///
    /// Returns `true` if a new account was created. Login and password must
    /// be non-empty and free of whitespace, since the auth line splits on it.
    /// Does not automatically save; call `save()` after making changes.
    pub fn add_user(&self, login: &str, password: &str) -> Result<bool> {
        for (what, value) in [("login", login), ("password", password)] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                anyhow::bail!("{} must be non-empty and contain no whitespace", what);
            }
        }

        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on credential store"))?;

        let created = users
            .insert(login.to_string(), UserRecord::new(login, password))
            .is_none();
        if created {
            tracing::info!(login = %login, "Added account");
        } else {
            tracing::info!(login = %login, "Updated account password");
        }
        Ok(created)
    }

    /// Removes an account.
    ///
    /// Returns the removed record if it existed.
    /// Does not automatically save; call `save()` after making changes.
    pub fn remove_user(&self, login: &str) -> Result<Option<UserRecord>> {
        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on credential store"))?;

        let removed = users.remove(login);
        if removed.is_some() {
            tracing::info!(login = %login, "Removed account");
        }
        Ok(removed)
    }

    /// Checks a clear-text password against the stored digest.
    pub fn verify(&self, login: &str, password: &str) -> Result<bool> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on credential store"))?;

        Ok(users
            .get(login)
            .map(|user| user.matches(password))
            .unwrap_or(false))
    }

    /// Lists all accounts, sorted by login.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on credential store"))?;

        let mut records: Vec<UserRecord> = users.values().cloned().collect();
        records.sort_by(|a, b| a.login.cmp(&b.login));
        Ok(records)
    }

    /// Returns the number of accounts in the store.
    pub fn len(&self) -> Result<usize> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on credential store"))?;
        Ok(users.len())
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Authenticator for CredentialStore {
    fn authenticate(&self, login: &str, password: &str) -> bool {
        match self.verify(login, password) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(login = %login, "Rejected credentials");
                false
            }
            Err(e) => {
                tracing::error!(login = %login, "Credential lookup failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> CredentialStore {
        CredentialStore::new(temp_dir.path().join("users.json"))
    }

    #[test]
    fn test_hash_password_is_sha256_hex() {
        assert_eq!(
            hash_password("", "password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert_eq!(hash_password("00ff", "").len(), 64);
        assert_ne!(hash_password("00ff", "pw"), hash_password("", "pw"));
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let alice = UserRecord::new("alice", "shared-pw");
        let bob = UserRecord::new("bob", "shared-pw");

        assert_eq!(alice.salt.len(), SALT_LEN * 2);
        assert_ne!(alice.salt, bob.salt);
        assert_ne!(alice.password_hash, bob.password_hash);
        assert!(alice.matches("shared-pw"));
        assert!(bob.matches("shared-pw"));
        assert!(!alice.matches("shared-pW"));
    }

    #[test]
    fn test_record_without_salt_still_verifies() {
        let json = r#"{
            "login": "legacy",
            "password_hash": "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8",
            "created_at": { "secs_since_epoch": 0, "nanos_since_epoch": 0 }
        }"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert!(record.salt.is_empty());
        assert!(record.matches("password"));
        assert!(!record.matches("passwort"));
    }

    #[test]
    fn test_corrupt_hash_never_matches() {
        let mut record = UserRecord::new("alice", "pw");
        record.password_hash = "not hex".to_string();
        assert!(!record.matches("pw"));
        record.password_hash.clear();
        assert!(!record.matches(""));
    }

    #[test]
    fn test_add_and_verify() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        assert!(store.add_user("alice", "wonderland").unwrap());
        assert!(store.verify("alice", "wonderland").unwrap());
        assert!(!store.verify("alice", "Wonderland").unwrap());
        assert!(!store.verify("bob", "wonderland").unwrap());
    }

    #[test]
    fn test_add_existing_replaces_password() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        assert!(store.add_user("alice", "old").unwrap());
        assert!(!store.add_user("alice", "new").unwrap());
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.verify("alice", "new").unwrap());
        assert!(!store.verify("alice", "old").unwrap());
    }

    #[test]
    fn test_add_rejects_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        assert!(store.add_user("al ice", "pw").is_err());
        assert!(store.add_user("alice", "p w").is_err());
        assert!(store.add_user("", "pw").is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_remove_user() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        store.add_user("alice", "pw").unwrap();
        let removed = store.remove_user("alice").unwrap();
        assert_eq!(removed.unwrap().login, "alice");
        assert!(store.remove_user("alice").unwrap().is_none());
        assert!(!store.verify("alice", "pw").unwrap());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("users.json");

        let store1 = CredentialStore::new(&path);
        store1.add_user("carol", "c4rol").unwrap();
        store1.add_user("alice", "4lice").unwrap();
        store1.save().unwrap();

        assert!(!path.with_extension("json.tmp").exists());

        let store2 = CredentialStore::open(&path).unwrap();
        assert_eq!(store2.len().unwrap(), 2);
        assert!(store2.verify("carol", "c4rol").unwrap());

        let logins: Vec<String> = store2
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.login)
            .collect();
        assert_eq!(logins, vec!["alice", "carol"]);
    }

    #[test]
    fn test_file_does_not_contain_clear_password() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.add_user("alice", "sup3r-secret").unwrap();
        store.save().unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        assert!(!contents.contains("sup3r-secret"));
        let record = &store.list_users().unwrap()[0];
        assert!(contents.contains(&record.salt));
        assert!(contents.contains(&hash_password(&record.salt, "sup3r-secret")));
        assert!(contents.contains("\"version\": 1"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.load().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().unwrap_err().to_string();
        assert!(err.contains("Failed to parse credential store"));
    }

    #[test]
    fn test_authenticator_impl() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.add_user("dave", "pw").unwrap();

        let auth: &dyn Authenticator = &store;
        assert!(auth.authenticate("dave", "pw"));
        assert!(!auth.authenticate("dave", "nope"));
        assert!(!auth.authenticate("eve", "pw"));
    }

    #[test]
    fn test_concurrent_verification() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(create_test_store(&temp_dir));
        for i in 0..10 {
            store.add_user(&format!("user{}", i), "pw").unwrap();
        }

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..100 {
                        assert!(store.authenticate(&format!("user{}", i % 10), "pw"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
