//! Session cache with TTL expiry
//!
//! Authenticated institutions hand out session cookies that expire
//! server-side; caching them avoids a login round-trip per page. Time is
//! injected through the [`Clock`] trait so expiry is testable without
//! sleeping.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Source of the current time
///
/// Production code uses [`SystemClock`]; tests substitute a fixed clock to
/// exercise expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A harvested login session for one institution
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Cookie header value, ready to send as-is
    pub cookie_header: String,

    /// When the session was established
    pub created_at: DateTime<Utc>,
}

/// In-memory cache of login sessions, keyed by institution id
pub struct SessionCache {
    sessions: HashMap<String, Session>,
    ttl: Duration,
    clock: Box<dyn Clock>,
}

impl SessionCache {
    /// Creates a cache where entries expire after `ttl_minutes`
    pub fn new(ttl_minutes: i64) -> Self {
        Self::with_clock(ttl_minutes, Box::new(SystemClock))
    }

    /// Creates a cache with an injected clock
    pub fn with_clock(ttl_minutes: i64, clock: Box<dyn Clock>) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl: Duration::minutes(ttl_minutes),
            clock,
        }
    }

    /// Returns the cached session if one exists and has not expired
    ///
    /// An expired entry is removed as a side effect, so a subsequent `put`
    /// always replaces rather than resurrects it.
    pub fn get(&mut self, institution_id: &str) -> Option<Session> {
        let now = self.clock.now();
        let expired = match self.sessions.get(institution_id) {
            Some(session) => now - session.created_at >= self.ttl,
            None => return None,
        };
        if expired {
            self.sessions.remove(institution_id);
            return None;
        }
        self.sessions.get(institution_id).cloned()
    }

    /// Stores a fresh session, stamping it with the current time
    pub fn put(&mut self, institution_id: &str, cookie_header: String) {
        self.sessions.insert(
            institution_id.to_string(),
            Session {
                cookie_header,
                created_at: self.clock.now(),
            },
        );
    }

    /// Drops a session known to be invalid (e.g. the server returned 401)
    pub fn invalidate(&mut self, institution_id: &str) {
        self.sessions.remove(institution_id);
    }
}
