use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::region::Region;

/// The one authenticated session a client holds. Never persisted here.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub user_id: Option<String>,
    pub service_token: Option<String>,
    pub ssecurity: Option<String>,
    pub region: Option<Region>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a signed request needs, borrowed out of a valid session.
#[derive(Debug, Clone)]
pub(crate) struct Credentials {
    pub user_id: String,
    pub service_token: String,
    pub ssecurity: String,
    pub region: Region,
}

impl SessionState {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.service_token.is_some() && self.expires_at.is_some_and(|at| now < at)
    }

    pub fn credentials(&self, now: DateTime<Utc>) -> Option<Credentials> {
        if !self.is_valid(now) {
            return None;
        }
        Some(Credentials {
            user_id: self.user_id.clone().unwrap_or_default(),
            service_token: self.service_token.clone()?,
            ssecurity: self.ssecurity.clone()?,
            region: self.region?,
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AuthState {
        AuthState {
            is_authenticated: self.is_valid(now),
            region: self.region,
            user_id: self.user_id.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Read-only view of the session handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    pub region: Option<Region>,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
