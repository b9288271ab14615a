use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TenantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Admin,
    Tenant,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Admin => write!(f, "admin"),
            SessionMode::Tenant => write!(f, "tenant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTenant {
    pub id: String,
    pub display_name: String,
    /// State layout version the session was opened against.
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionBackend {
    #[serde(rename = "type")]
    pub backend_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionLocks {
    #[serde(rename = "type")]
    pub lock_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionAws {
    pub account: String,
    pub region: String,
}

/// The authentication token the engine trusts. Produced by the login surface,
/// consumed by apply/destroy/drift (tenant mode) and tenant CRUD (admin mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<SessionTenant>,
    pub backend: SessionBackend,
    pub locks: SessionLocks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<SessionAws>,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The session check for apply/destroy/drift: tenant mode, unexpired,
    /// tenant reference present.
    pub fn require_tenant(&self, now: DateTime<Utc>) -> Result<&SessionTenant, TenantError> {
        if self.is_expired(now) {
            return Err(TenantError::SessionExpired);
        }
        if self.mode != SessionMode::Tenant {
            return Err(TenantError::WrongSessionMode {
                required: "tenant".to_string(),
                actual: self.mode.to_string(),
            });
        }
        self.tenant.as_ref().ok_or(TenantError::SessionExpired)
    }

    /// The session check for tenant CRUD: admin mode, unexpired.
    pub fn require_admin(&self, now: DateTime<Utc>) -> Result<(), TenantError> {
        if self.is_expired(now) {
            return Err(TenantError::SessionExpired);
        }
        if self.mode != SessionMode::Admin {
            return Err(TenantError::WrongSessionMode {
                required: "admin".to_string(),
                actual: self.mode.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn session(mode: SessionMode, expires_in: i64) -> Session {
        let now = Utc::now();
        Session {
            mode,
            tenant: Some(SessionTenant {
                id: "t-1".into(),
                display_name: "Acme".into(),
                version: "v1".into(),
            }),
            backend: SessionBackend::default(),
            locks: SessionLocks::default(),
            aws: None,
            authenticated_at: now,
            expires_at: now + Duration::seconds(expires_in),
        }
    }

    #[test]
    fn tenant_session_passes_tenant_check() {
        let s = session(SessionMode::Tenant, 3600);
        assert_eq!(s.require_tenant(Utc::now()).unwrap().id, "t-1");
    }

    #[test]
    fn admin_session_fails_tenant_check() {
        let s = session(SessionMode::Admin, 3600);
        assert!(matches!(
            s.require_tenant(Utc::now()),
            Err(TenantError::WrongSessionMode { .. })
        ));
        assert!(s.require_admin(Utc::now()).is_ok());
    }

    #[test]
    fn expired_session_rejected() {
        let s = session(SessionMode::Tenant, -1);
        assert!(matches!(
            s.require_tenant(Utc::now()),
            Err(TenantError::SessionExpired)
        ));
        let s = session(SessionMode::Admin, -1);
        assert!(matches!(
            s.require_admin(Utc::now()),
            Err(TenantError::SessionExpired)
        ));
    }
}
