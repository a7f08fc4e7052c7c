//! Auth registry (C3): connection-id <-> identity, with the single-device-
//! login invariant (I2).
//!
//! Grounded directly on the teacher's `ConnectionRegistry` one-session-per-
//! user enforcement (`user_sessions` reverse index, eviction on conflicting
//! bind) — here extracted into its own component and keyed by connection id
//! / identity rather than session id / user id, and returning the evicted
//! connection id to the caller instead of a bare bool, since the caller
//! (the dispatcher) must schedule that connection for close.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// What the registry remembers about an authenticated connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthInfo {
    /// The authenticated user/identity id.
    pub identity: String,
    /// Opaque auth token presented at authentication time.
    pub token: String,
    /// Caller-supplied timestamp (milliseconds), immutable after creation
    /// except on a same-connection re-authentication refresh.
    pub authenticated_at_ms: u64,
}

struct Inner {
    by_conn: HashMap<u64, AuthInfo>,
    by_identity: HashMap<String, u64>,
}

/// Maps `conn -> AuthInfo` and `identity -> conn`, enforcing that each
/// identity is bound to at most one connection at a time.
#[derive(Clone)]
pub struct AuthRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { by_conn: HashMap::new(), by_identity: HashMap::new() })) }
    }

    /// Binds `identity` to `conn`. If `identity` already maps to a
    /// different connection, that connection is evicted from the auth map
    /// and its id is returned — the caller must close it (I2). The whole
    /// operation runs under one lock, so two racing calls for the same
    /// identity serialize: exactly one wins.
    ///
    /// Re-authenticating the same `(conn, identity)` pair refreshes the
    /// token and timestamp without evicting anything.
    pub fn authenticate(
        &self,
        conn: u64,
        identity: String,
        token: String,
        now_ms: u64,
    ) -> Option<u64> {
        let mut inner = self.inner.lock().expect("auth registry mutex poisoned");

        let evicted = match inner.by_identity.get(&identity) {
            Some(&existing) if existing != conn => {
                inner.by_conn.remove(&existing);
                Some(existing)
            },
            _ => None,
        };

        inner.by_identity.insert(identity.clone(), conn);
        inner.by_conn.insert(conn, AuthInfo { identity, token, authenticated_at_ms: now_ms });

        evicted
    }

    /// Removes both mappings for `conn`, if present.
    pub fn deauthenticate(&self, conn: u64) -> Option<AuthInfo> {
        let mut inner = self.inner.lock().expect("auth registry mutex poisoned");
        let info = inner.by_conn.remove(&conn)?;
        if inner.by_identity.get(&info.identity) == Some(&conn) {
            inner.by_identity.remove(&info.identity);
        }
        Some(info)
    }

    /// Whether `conn` currently has a bound identity.
    pub fn is_authenticated(&self, conn: u64) -> bool {
        let inner = self.inner.lock().expect("auth registry mutex poisoned");
        inner.by_conn.contains_key(&conn)
    }

    /// The connection currently bound to `identity`, if any.
    pub fn lookup_by_identity(&self, identity: &str) -> Option<u64> {
        let inner = self.inner.lock().expect("auth registry mutex poisoned");
        inner.by_identity.get(identity).copied()
    }

    /// The identity bound to `conn`, if authenticated. Used by the rate
    /// limiter to key the per-identity scope.
    pub fn identity_for(&self, conn: u64) -> Option<String> {
        let inner = self.inner.lock().expect("auth registry mutex poisoned");
        inner.by_conn.get(&conn).map(|info| info.identity.clone())
    }

    /// Number of currently authenticated connections.
    pub fn snapshot_count(&self) -> usize {
        let inner = self.inner.lock().expect("auth registry mutex poisoned");
        inner.by_conn.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_binds_both_maps() {
        let registry = AuthRegistry::new();
        let evicted = registry.authenticate(1, "u1".to_string(), "tok".to_string(), 0);
        assert_eq!(evicted, None);
        assert!(registry.is_authenticated(1));
        assert_eq!(registry.lookup_by_identity("u1"), Some(1));
        assert_eq!(registry.snapshot_count(), 1);
    }

    /// P7: second authenticate for the same identity on a different
    /// connection evicts the first.
    #[test]
    fn single_device_login_evicts_prior_connection() {
        let registry = AuthRegistry::new();
        registry.authenticate(1, "u1".to_string(), "tok-a".to_string(), 0);
        let evicted = registry.authenticate(2, "u1".to_string(), "tok-b".to_string(), 10);

        assert_eq!(evicted, Some(1));
        assert!(!registry.is_authenticated(1));
        assert!(registry.is_authenticated(2));
        assert_eq!(registry.lookup_by_identity("u1"), Some(2));
        assert_eq!(registry.snapshot_count(), 1);
    }

    #[test]
    fn reauthenticating_same_connection_does_not_evict() {
        let registry = AuthRegistry::new();
        registry.authenticate(1, "u1".to_string(), "tok-a".to_string(), 0);
        let evicted = registry.authenticate(1, "u1".to_string(), "tok-b".to_string(), 5);

        assert_eq!(evicted, None);
        assert!(registry.is_authenticated(1));
        assert_eq!(registry.lookup_by_identity("u1"), Some(1));
        assert_eq!(registry.snapshot_count(), 1);
    }

    #[test]
    fn deauthenticate_removes_both_mappings() {
        let registry = AuthRegistry::new();
        registry.authenticate(1, "u1".to_string(), "tok".to_string(), 0);
        let removed = registry.deauthenticate(1);
        assert!(removed.is_some());
        assert!(!registry.is_authenticated(1));
        assert_eq!(registry.lookup_by_identity("u1"), None);
    }

    #[test]
    fn deauthenticate_after_eviction_does_not_clobber_new_owner() {
        let registry = AuthRegistry::new();
        registry.authenticate(1, "u1".to_string(), "tok-a".to_string(), 0);
        registry.authenticate(2, "u1".to_string(), "tok-b".to_string(), 10);
        // conn 1 was already evicted; deauthenticating it must not touch
        // the identity->conn mapping now owned by conn 2.
        registry.deauthenticate(1);
        assert_eq!(registry.lookup_by_identity("u1"), Some(2));
    }

    #[test]
    fn deauthenticate_unknown_connection_is_none() {
        let registry = AuthRegistry::new();
        assert_eq!(registry.deauthenticate(42), None);
    }

    #[test]
    fn distinct_identities_do_not_evict_each_other() {
        let registry = AuthRegistry::new();
        registry.authenticate(1, "u1".to_string(), "tok".to_string(), 0);
        let evicted = registry.authenticate(2, "u2".to_string(), "tok".to_string(), 0);
        assert_eq!(evicted, None);
        assert!(registry.is_authenticated(1));
        assert!(registry.is_authenticated(2));
        assert_eq!(registry.snapshot_count(), 2);
    }
}
