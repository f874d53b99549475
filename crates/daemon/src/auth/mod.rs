//! Authentication module.
//!
//! Sessions only see the [`Authenticator`] capability: a login and password
//! in, allow or deny out. [`CredentialStore`] is the file-backed
//! implementation used by the daemon binary.

pub mod credential_store;

pub use credential_store::{hash_password, CredentialStore, UserRecord};

/// Verifies a login and password.
///
/// Implementations are shared across all sessions and must be safe to call
/// concurrently. Calls run on the blocking pool, so an implementation may
/// block on I/O.
pub trait Authenticator: Send + Sync {
    /// Returns `true` if the credentials are accepted.
    fn authenticate(&self, login: &str, password: &str) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authenticate(&self, login: &str, password: &str) -> bool {
        self(login, password)
    }
}
