use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub chat_socket_url: String,
    pub history_dir: String,
    pub history_retention_days: i64,
    pub vendor_domains: Vec<String>,
    pub permissive_eligibility: bool,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let config = Self {
            api_base_url: env::var("TELECARE_API_URL")
                .unwrap_or_else(|_| {
                    warn!("TELECARE_API_URL not set, using empty value");
                    String::new()
                }),
            chat_socket_url: env::var("TELECARE_CHAT_SOCKET_URL")
                .unwrap_or_else(|_| {
                    warn!("TELECARE_CHAT_SOCKET_URL not set, using empty value");
                    String::new()
                }),
            history_dir: env::var("TELECARE_HISTORY_DIR")
                .unwrap_or_else(|_| {
                    warn!("TELECARE_HISTORY_DIR not set, using default");
                    ".telecare/history".to_string()
                }),
            history_retention_days: env::var("TELECARE_HISTORY_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            vendor_domains: env::var("TELECARE_VENDOR_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| {
                    warn!("TELECARE_VENDOR_DOMAINS not set, using defaults");
                    vec!["zegocloud.com".to_string(), "zego.im".to_string()]
                }),
            // Only honored in debug builds; a release binary always runs with
            // the standard eligibility policy.
            permissive_eligibility: if cfg!(debug_assertions) {
                env::var("TELECARE_PERMISSIVE_ELIGIBILITY")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            } else {
                false
            },
        };

        if !config.is_configured() {
            warn!("Client not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.api_base_url.is_empty() && !self.chat_socket_url.is_empty()
    }

    pub fn is_video_configured(&self) -> bool {
        !self.api_base_url.is_empty() && !self.vendor_domains.is_empty()
    }
}
