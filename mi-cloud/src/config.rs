use std::time::Duration;

use crate::region::{build_api_base_url, Region};

/// Hosts the client talks to. Tests point both at local mocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub account_base: String,
    /// Replaces the regional API base for every region when set.
    pub api_base_override: Option<String>,
}

impl Endpoints {
    pub fn login_url(&self) -> String {
        format!("{}/longPolling/loginUrl", self.account_base)
    }

    pub fn api_base_url(&self, region: Region) -> String {
        match &self.api_base_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => build_api_base_url(region),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            account_base: "https://account.xiaomi.com".to_string(),
            api_base_override: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    /// Per-request timeout of a long-poll; expiring it only means "still pending".
    pub poll_timeout: Duration,
    pub qr_session_ttl: Duration,
    pub session_ttl: Duration,
    pub locale: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            poll_timeout: Duration::from_secs(10),
            qr_session_ttl: Duration::from_secs(5 * 60),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            locale: "en_GB".to_string(),
        }
    }
}
