use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Caller identity as asserted by the auth provider's token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// Who is acting on a scheduling record. Admins may act for anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self { user_id, is_admin: false }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, is_admin: true }
    }

    pub fn from_user(user: &User) -> Option<Self> {
        user.user_id().map(|user_id| Self { user_id, is_admin: user.is_admin() })
    }

    pub fn may_act_for(&self, owner: Uuid) -> bool {
        self.is_admin || self.user_id == owner
    }
}
