use uuid::Uuid;

use shared_config::ClientConfig;
use shared_models::{User, UserRole};

pub struct TestConfig {
    pub api_base_url: String,
    pub chat_socket_url: String,
    pub history_dir: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            chat_socket_url: "ws://localhost:3001/chat".to_string(),
            history_dir: ".telecare-test/history".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base_url: self.api_base_url.clone(),
            chat_socket_url: self.chat_socket_url.clone(),
            history_dir: self.history_dir.clone(),
            history_retention_days: 7,
            vendor_domains: vec!["zegocloud.com".to_string(), "zego.im".to_string()],
            permissive_eligibility: false,
        }
    }
}

pub struct TestUser;

impl TestUser {
    pub fn with_role(role: UserRole) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            email: Some("test@example.com".to_string()),
            role,
            created_at: None,
        }
    }

    pub fn patient() -> User {
        Self::with_role(UserRole::Patient)
    }

    pub fn doctor() -> User {
        Self::with_role(UserRole::Doctor)
    }

    pub fn admin() -> User {
        Self::with_role(UserRole::Admin)
    }
}
