//! Mi Cloud client for fetching the BLE beacon key of Xiaomi devices.
//!
//! The flow is: [`MiCloudClient::start_qr_login`], poll
//! [`MiCloudClient::poll_login_status`] until it is terminal,
//! [`MiCloudClient::complete_login`] with the confirmed token, then
//! [`MiCloudClient::get_devices`] and [`MiCloudClient::get_ble_key`].

mod api;
mod beacon_key;
pub mod clock;
pub mod config;
mod devices;
mod error;
mod login;
mod qr_login;
pub mod region;
pub mod response;
mod session;
pub mod signer;
pub mod transport;

pub use beacon_key::BleKeyResult;
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, Endpoints};
pub use devices::{is_ble_did, Device};
pub use error::{Error, Result};
pub use qr_login::{LoginStatus, QrLoginStart};
pub use region::{build_api_base_url, Region};
pub use session::AuthState;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

use chrono::{DateTime, Utc};
use log::info;
use qr_login::QrSession;
use rand::Rng;
use serde_json::Value;
use session::SessionState;
use std::{
    collections::HashMap,
    iter,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use uuid::Uuid;

fn serde_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One Mi Cloud account session plus the QR logins leading up to it.
///
/// All methods take `&self`; the session and the QR session map sit behind
/// their own locks, and login completion is serialized.
pub struct MiCloudClient {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    user_agent: String,
    device_id: String,
    session: Mutex<SessionState>,
    qr_sessions: Mutex<HashMap<String, QrSession>>,
    login_guard: tokio::sync::Mutex<()>,
}

impl MiCloudClient {
    pub fn new() -> Result<Self> {
        Ok(Self::with_parts(
            Arc::new(ReqwestTransport::new()?),
            Arc::new(SystemClock),
            ClientConfig::default(),
        ))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_parts(
            Arc::new(ReqwestTransport::new()?),
            Arc::new(SystemClock),
            config,
        ))
    }

    pub fn with_parts(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let agent_id: String =
            iter::repeat_with(|| b"ABCDEF"[rng.gen_range(0..b"ABCDEF".len())] as char)
                .take(13)
                .collect();

        MiCloudClient {
            transport,
            clock,
            config,
            user_agent: format!(
                "Android-7.1.1-1.0.0-ONEPLUS A3010-136-{} APP/xiaomi.smarthome APPV/62830",
                agent_id
            ),
            device_id: format!("android_{}", Uuid::new_v4()),
            session: Mutex::new(SessionState::default()),
            qr_sessions: Mutex::new(HashMap::new()),
            login_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get_auth_state(&self) -> AuthState {
        lock(&self.session).snapshot(self.now())
    }

    pub fn is_session_valid(&self) -> bool {
        lock(&self.session).is_valid(self.now())
    }

    /// Forgets the session and every outstanding QR login.
    pub fn logout(&self) {
        *lock(&self.session) = SessionState::default();
        lock(&self.qr_sessions).clear();
        info!("Logged out of Mi Cloud");
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn deadline(&self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn serde_value_to_string() {
        let obj = serde_json::json!({
            "string": "string",
            "bool": true,
            "number": 1
        });
        assert_eq!(super::serde_value_to_string(&obj["string"]), "string");
        assert_eq!(super::serde_value_to_string(&obj["bool"]), "true");
        assert_eq!(super::serde_value_to_string(&obj["number"]), "1");
        assert_eq!(super::serde_value_to_string(&obj["missing"]), "");
    }

    #[test]
    fn encode_query() {
        let result = super::encode_query(&[
            ("_nonce", "BejIOTLgvecBs9sT"),
            ("data", r#"{"getHuamiDevices":0,"getVirtualModel":false}"#),
            ("signature", "6KEUC7sycg/Vhh0Jz7bZqT1JCza7bv36B3WcKnuW9J8="),
        ]);
        let expect = "_nonce=BejIOTLgvecBs9sT&data=%7B%22getHuamiDevices%22%3A0%2C%22getVirtualModel%22%3Afalse%7D&signature=6KEUC7sycg%2FVhh0Jz7bZqT1JCza7bv36B3WcKnuW9J8%3D";
        assert_eq!(result, expect);
    }

    #[test]
    fn user_agent_is_fixed_per_client() {
        let h = harness();
        assert!(h.client.user_agent.starts_with("Android-7.1.1-1.0.0-ONEPLUS A3010-136-"));
        assert!(h.client.device_id.starts_with("android_"));
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let h = harness();
        assert!(!h.client.is_session_valid());
        assert!(!h.client.get_auth_state().is_authenticated);

        let h = logged_in().await;
        assert!(h.client.is_session_valid());
        let state = h.client.get_auth_state();
        assert!(state.is_authenticated);
        assert_eq!(state.region, Some(Region::De));
        assert_eq!(state.user_id.as_deref(), Some("1234"));

        h.clock.advance(chrono::Duration::hours(24));
        assert!(!h.client.is_session_valid());
    }

    #[tokio::test]
    async fn logout_clears_session_and_qr_logins() {
        let h = logged_in().await;
        h.transport.respond(
            &format!("{}/longPolling/loginUrl", ACCOUNT),
            200,
            r#"&&&START&&&{"qr":"u1","loginUrl":"u2","lp":"https://mock.lp/p1"}"#,
        );
        let started = h.client.start_qr_login().await.unwrap();

        h.client.logout();

        assert!(!h.client.is_session_valid());
        assert_eq!(h.client.get_auth_state().user_id, None);
        assert!(matches!(
            h.client.poll_login_status(&started.session_id).await.unwrap(),
            LoginStatus::Error { .. }
        ));
    }

    #[tokio::test]
    async fn qr_login_to_beacon_key() {
        let h = harness();
        h.transport.respond(
            &format!("{}/longPolling/loginUrl", ACCOUNT),
            200,
            r#"&&&START&&&{"qr":"u1","loginUrl":"u2","lp":"https://mock.lp/p1"}"#,
        );
        h.transport.respond(
            "https://mock.lp/p1",
            200,
            &format!(
                r#"&&&START&&&{{"code":0,"ssecurity":"{}","userId":1234,"passToken":"pt","location":"https://mock.sts/sts?d=1"}}"#,
                SSECURITY
            ),
        );
        h.transport.reply(
            "https://mock.sts/sts",
            Ok(HttpResponse::new(302, "")
                .with_header("Set-Cookie", "serviceToken=from-cookie; path=/; domain=mi.com")),
        );
        h.transport.respond(
            &api("/home/device_list"),
            200,
            r#"{"code":0,"message":"ok","result":{"list":[{"did":"blt.3.scale","name":"Scale","model":"yunmai.scales.ms103","mac":"11:22:33:44:55:66"}]}}"#,
        );
        h.transport.respond(
            &api("/v2/device/blt_get_beaconkey"),
            200,
            r#"{"code":0,"result":{"beaconkey":"AABB","mac":"11:22:33:44:55:66"}}"#,
        );

        let started = h.client.start_qr_login().await.unwrap();
        let token = match h.client.poll_login_status(&started.session_id).await.unwrap() {
            LoginStatus::Confirmed { auth_token } => auth_token,
            other => panic!("unexpected status {:?}", other),
        };
        h.client.complete_login(&token, Region::Cn).await.unwrap();

        let devices = h.client.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_ble);

        let key = h.client.get_ble_key(&devices[0].did).await.unwrap();
        assert_eq!(key.beacon_key, "AABB");

        let signed = h.transport.requests_to(&api("/home/device_list"));
        assert_eq!(
            signed[0].header_value("Cookie"),
            Some("userId=1234;serviceToken=from-cookie;locale=en_GB")
        );
    }
}
