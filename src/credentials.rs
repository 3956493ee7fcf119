//! Username to password-digest lookup table.
//!
//! Passwords are stored as a single unsalted SHA-256 digest. That is enough to
//! keep plaintext out of memory dumps and logs, but it is not a password
//! hashing scheme suitable for a real deployment.

use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Accounts installed when no credentials are configured
pub const DEFAULT_ACCOUNTS: &[(&str, &str)] = &[("admin", "admin123"), ("user", "user123")];

/// Fixed-length password digest
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PasswordHash([u8; 32]);

impl fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Never print digests in debug output
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Digest a password with the store's one-way function.
///
/// Plain unsalted SHA-256: equal passwords give equal digests, so this is
/// unsuitable for credentials that matter outside a test deployment.
pub fn hash_password(password: &str) -> PasswordHash {
    let digest = Sha256::digest(password.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    PasswordHash(bytes)
}

/// Error returned when a `NAME:PASSWORD` account spec cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAccountSpec(pub String);

impl fmt::Display for InvalidAccountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid account '{}': expected NAME:PASSWORD with a non-empty name",
            self.0
        )
    }
}

impl std::error::Error for InvalidAccountSpec {}

/// Read-only credential store, populated once at startup
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<String, PasswordHash>,
}

impl CredentialStore {
    /// Build a store from plaintext username/password pairs.
    /// A repeated username keeps the last password given.
    pub fn from_plaintext<I, U, P>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: AsRef<str>,
    {
        let entries = accounts
            .into_iter()
            .map(|(user, password)| (user.into(), hash_password(password.as_ref())))
            .collect();
        Self { entries }
    }

    /// Store holding the built-in default accounts
    pub fn with_defaults() -> Self {
        Self::from_plaintext(DEFAULT_ACCOUNTS.iter().copied())
    }

    /// Build a store from `NAME:PASSWORD` specs; falls back to the defaults when empty
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, InvalidAccountSpec> {
        if specs.is_empty() {
            return Ok(Self::with_defaults());
        }

        let mut accounts = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.as_ref();
            match spec.split_once(':') {
                Some((name, password)) if !name.is_empty() => {
                    accounts.push((name.to_string(), password.to_string()))
                }
                _ => return Err(InvalidAccountSpec(spec.to_string())),
            }
        }
        Ok(Self::from_plaintext(accounts))
    }

    pub fn lookup(&self, username: &str) -> Option<&PasswordHash> {
        self.entries.get(username)
    }

    /// Check a plaintext password against the stored digest
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.lookup(username)
            .is_some_and(|stored| *stored == hash_password(password))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_sha256() {
        assert_eq!(
            hash_password("admin123").to_string(),
            "240be518fabd2724ddb6f04eeb1da5967448d7e831c08c8fa822809f74c720a9"
        );
        assert_eq!(hash_password("x"), hash_password("x"));
        assert_ne!(hash_password("x"), hash_password("y"));
    }

    #[test]
    fn test_default_accounts_verify() {
        let store = CredentialStore::with_defaults();
        assert_eq!(store.len(), 2);
        assert!(store.verify("admin", "admin123"));
        assert!(store.verify("user", "user123"));
        assert!(!store.verify("admin", "user123"));
        assert!(!store.verify("nobody", "admin123"));
        assert!(!store.verify("admin", ""));
    }

    #[test]
    fn test_lookup_unknown_user() {
        let store = CredentialStore::with_defaults();
        assert!(store.lookup("root").is_none());
        assert_eq!(store.lookup("admin"), Some(&hash_password("admin123")));
    }

    #[test]
    fn test_from_specs() {
        let store = CredentialStore::from_specs(&["ops:s3cret:with:colons", "guest:"]).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.verify("ops", "s3cret:with:colons"));
        assert!(store.verify("guest", ""));
        assert!(!store.contains("admin"));
    }

    #[test]
    fn test_from_specs_empty_uses_defaults() {
        let specs: [&str; 0] = [];
        let store = CredentialStore::from_specs(&specs).unwrap();
        assert!(store.contains("admin"));
        assert!(store.contains("user"));
    }

    #[test]
    fn test_from_specs_rejects_malformed() {
        let err = CredentialStore::from_specs(&["no-separator"]).unwrap_err();
        assert_eq!(err, InvalidAccountSpec("no-separator".to_string()));

        assert!(CredentialStore::from_specs(&[":password"]).is_err());
    }

    #[test]
    fn test_debug_hides_digest() {
        let hash = hash_password("admin123");
        assert_eq!(format!("{:?}", hash), "PasswordHash(..)");
    }
}
