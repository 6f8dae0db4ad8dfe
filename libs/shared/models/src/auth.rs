use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller roles recognized by the client. Doctors and admins carry host
/// privileges: early join and call-control actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    #[serde(rename = "patient")]
    Patient,
    #[serde(rename = "doctor")]
    Doctor,
    #[serde(rename = "admin")]
    Admin,
}

impl UserRole {
    pub fn is_host(&self) -> bool {
        matches!(self, UserRole::Doctor | UserRole::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }
}
