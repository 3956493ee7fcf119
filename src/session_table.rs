//! Bearer session tokens and the identities they were issued for.
//!
//! Tokens carry no expiry; a session lives until the table is cleared.

use std::collections::HashMap;
use std::time::SystemTime;

use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes in a session token (rendered as twice as many hex chars)
pub const TOKEN_BYTES: usize = 32;

/// An authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    created_at: SystemTime,
}

impl Session {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

/// Maps bearer tokens to the identity they were issued for.
///
/// The table itself is not synchronized; the host shares it behind a single
/// mutex so token issue, lookup and bulk invalidation are serialized.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `username` and record the session
    pub fn create(&mut self, username: impl Into<String>) -> String {
        let username = username.into();
        let token = loop {
            let candidate = generate_token();
            // Collisions are astronomically unlikely, but a live token is never reissued
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        log::debug!("Issued session token for '{}'", username);
        self.sessions.insert(
            token.clone(),
            Session {
                username,
                created_at: SystemTime::now(),
            },
        );
        self.log_state("Active sessions after login");
        token
    }

    /// Return the username a token was issued for, if it is still live
    pub fn validate(&self, token: &str) -> Option<&str> {
        self.sessions.get(token).map(Session::username)
    }

    pub fn get(&self, token: &str) -> Option<&Session> {
        self.sessions.get(token)
    }

    /// Drop every session, returning how many were live
    pub fn invalidate_all(&mut self) -> usize {
        let dropped = self.sessions.len();
        self.sessions.clear();
        log::info!("Invalidated {} session(s)", dropped);
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Log a summary of live sessions per user
    pub fn log_state(&self, context: impl AsRef<str>) {
        let context = context.as_ref();
        if self.sessions.is_empty() {
            log::info!("{}: no active sessions", context);
            return;
        }

        let mut per_user: HashMap<&str, usize> = HashMap::new();
        for session in self.sessions.values() {
            *per_user.entry(session.username()).or_default() += 1;
        }
        let mut users = per_user
            .into_iter()
            .map(|(user, count)| format!("{} ({})", user, count))
            .collect::<Vec<_>>();
        users.sort();

        log::info!(
            "{}: {} active session(s); users: [{}]",
            context,
            self.sessions.len(),
            users.join(", ")
        );
    }
}

/// 256 bits from the OS CSPRNG, hex encoded
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
