//! Caller identity resolution.
//!
//! Every inbound call is charged against one stable actor key derived from
//! the authenticated user (when present), the client network address, and a
//! client-supplied device fingerprint. The key is recomputed per call and
//! never stored.

/// Substitute used when a caller sends no fingerprint header. Those callers
/// collapse to per-address granularity, a documented limitation rather than
/// an error.
pub const UNKNOWN_FINGERPRINT: &str = "no-fingerprint";

/// Marker used when no client address could be determined at all.
pub const UNKNOWN_IP: &str = "unknown";

/// Authentication claims inserted into request extensions by the upstream
/// authentication collaborator. Absence of this extension means the caller
/// is a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: i64,
    pub role: Role,
}

/// Role carried by an authenticated caller's claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Quota tier a request is charged under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Guest,
    User,
    Admin,
}

/// Resolved identity of the caller for a single request.
#[derive(Debug, Clone)]
pub struct ActorIdentity {
    pub claims: Option<AuthClaims>,
    pub ip: String,
    pub fingerprint: String,
}

impl ActorIdentity {
    pub fn guest(ip: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            claims: None,
            ip: ip.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn authenticated(
        claims: AuthClaims,
        ip: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            claims: Some(claims),
            ip: ip.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.claims.is_some()
    }

    /// Tier resolution is a pure function of the claims.
    pub fn tier(&self) -> Tier {
        match self.claims.as_ref().map(|claims| claims.role) {
            None => Tier::Guest,
            Some(Role::User) => Tier::User,
            Some(Role::Admin) => Tier::Admin,
        }
    }

    /// Stable ledger key for this caller.
    ///
    /// Two calls from the same human in the same window resolve to the same
    /// key; calls from different humans do not collide unless both identity
    /// sources degrade to their placeholders.
    pub fn ledger_key(&self) -> String {
        match self.claims.as_ref() {
            Some(claims) => format!(
                "authed:{}:{}:{}",
                claims.user_id, self.ip, self.fingerprint
            ),
            None => format!("guest:{}:{}", self.ip, self.fingerprint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_key_shape() {
        let actor = ActorIdentity::guest("198.51.100.7", "fp-abc");
        assert_eq!(actor.ledger_key(), "guest:198.51.100.7:fp-abc");
        assert_eq!(actor.tier(), Tier::Guest);
    }

    #[test]
    fn authenticated_key_includes_user_id() {
        let claims = AuthClaims {
            user_id: 42,
            role: Role::User,
        };
        let actor = ActorIdentity::authenticated(claims, "198.51.100.7", "fp-abc");
        assert_eq!(actor.ledger_key(), "authed:42:198.51.100.7:fp-abc");
        assert_eq!(actor.tier(), Tier::User);
    }

    #[test]
    fn admin_claims_map_to_admin_tier() {
        let claims = AuthClaims {
            user_id: 1,
            role: Role::Admin,
        };
        let actor = ActorIdentity::authenticated(claims, "203.0.113.1", UNKNOWN_FINGERPRINT);
        assert_eq!(actor.tier(), Tier::Admin);
        assert!(actor.is_authenticated());
    }

    #[test]
    fn same_inputs_resolve_to_same_key() {
        let a = ActorIdentity::guest("203.0.113.1", "fp");
        let b = ActorIdentity::guest("203.0.113.1", "fp");
        assert_eq!(a.ledger_key(), b.ledger_key());

        let c = ActorIdentity::guest("203.0.113.2", "fp");
        assert_ne!(a.ledger_key(), c.ledger_key());
    }
}
