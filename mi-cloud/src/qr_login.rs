//! QR-code login against the Xiaomi account service.
//!
//! `start_qr_login` asks for a QR image and a long-poll URL, and the caller keeps
//! calling `poll_login_status` until the status is terminal.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::{thread_rng, Rng};
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::response;
use crate::transport::{HttpRequest, HttpResponse, TransportError};
use crate::{encode_query, lock, MiCloudClient};

/// Long-poll statuses that only mean "nobody confirmed yet".
const PENDING_HTTP_STATUSES: [u16; 3] = [403, 408, 504];

#[derive(Debug, Clone)]
pub(crate) struct QrSession {
    pub session_id: String,
    pub qr_code_url: String,
    pub login_url: Option<String>,
    pub poll_url: String,
    pub expires_at: DateTime<Utc>,
}

impl QrSession {
    fn summary(&self) -> QrLoginStart {
        QrLoginStart {
            session_id: self.session_id.clone(),
            qr_code_url: self.qr_code_url.clone(),
            login_url: self.login_url.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// What the caller needs to show the QR code to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrLoginStart {
    pub session_id: String,
    pub qr_code_url: String,
    pub login_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LoginStatus {
    Pending,
    Scanned,
    Confirmed {
        #[serde(rename = "authToken")]
        auth_token: String,
    },
    Expired,
    Error {
        message: String,
    },
}

impl LoginStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginStatus::Confirmed { .. } | LoginStatus::Expired | LoginStatus::Error { .. }
        )
    }
}

/// Carried from a confirmed poll to `complete_login` as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthToken {
    pub ssecurity: String,
    pub user_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl MiCloudClient {
    pub async fn start_qr_login(&self) -> Result<QrLoginStart> {
        let now = self.now();
        let dc = now.timestamp_millis().to_string();
        let query = encode_query(&[
            ("_qrsize", "240"),
            ("qs", "?sid=xiaomiio&_json=true"),
            ("callback", "https://sts.api.io.mi.com/sts"),
            ("_hasLogo", "false"),
            ("sid", "xiaomiio"),
            ("serviceParam", ""),
            ("_locale", self.config.locale.as_str()),
            ("_dc", dc.as_str()),
        ]);
        let login_url = self.config.endpoints.login_url();

        let res = self
            .transport
            .send(
                HttpRequest::get(format!("{}?{}", login_url, query))
                    .header(header::USER_AGENT.as_str(), &self.user_agent)
                    .header(
                        header::COOKIE.as_str(),
                        format!("deviceId={}", self.device_id),
                    ),
            )
            .await?;

        if !res.is_success() {
            return Err(Error::Transport {
                status: res.status,
                url: login_url,
            });
        }

        let data = response::decode(&res.body)?;
        let qr_code_url = first_str(&data, &["qr", "qrUrl"])
            .ok_or_else(|| Error::Protocol("login url response has no QR image url".into()))?;
        let poll_url = first_str(&data, &["lp"])
            .ok_or_else(|| Error::Protocol("login url response has no poll url".into()))?;

        let session = QrSession {
            session_id: hex::encode(thread_rng().gen::<[u8; 16]>()),
            qr_code_url,
            login_url: first_str(&data, &["loginUrl"]),
            poll_url,
            expires_at: self.deadline(now, self.config.qr_session_ttl),
        };
        let started = session.summary();
        {
            let mut sessions = lock(&self.qr_sessions);
            sessions.retain(|_, s| now < s.expires_at);
            sessions.insert(session.session_id.clone(), session);
        }
        info!("Started QR login session {}", started.session_id);

        Ok(started)
    }

    pub async fn poll_login_status(&self, session_id: &str) -> Result<LoginStatus> {
        let now = self.now();
        let poll_url = {
            let mut sessions = lock(&self.qr_sessions);
            let live = match sessions.get(session_id) {
                Some(s) if now < s.expires_at => Some(s.poll_url.clone()),
                Some(_) => None,
                None => {
                    return Ok(LoginStatus::Error {
                        message: format!("unknown login session {}", session_id),
                    })
                }
            };
            match live {
                Some(url) => url,
                None => {
                    sessions.remove(session_id);
                    info!("QR login session {} expired", session_id);
                    return Ok(LoginStatus::Expired);
                }
            }
        };

        let reply = self
            .transport
            .send(
                HttpRequest::get(&poll_url)
                    .header(header::USER_AGENT.as_str(), &self.user_agent)
                    .timeout(self.config.poll_timeout),
            )
            .await;
        let status = classify_poll_response(reply, &poll_url)?;
        debug!("QR login session {} polled: {}", session_id, status_name(&status));

        if let LoginStatus::Confirmed { .. } = status {
            lock(&self.qr_sessions).remove(session_id);
            info!("QR login session {} confirmed", session_id);
        }
        Ok(status)
    }
}

fn status_name(status: &LoginStatus) -> &'static str {
    match status {
        LoginStatus::Pending => "pending",
        LoginStatus::Scanned => "scanned",
        LoginStatus::Confirmed { .. } => "confirmed",
        LoginStatus::Expired => "expired",
        LoginStatus::Error { .. } => "error",
    }
}

fn first_str(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| data[*k].as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn classify_poll_response(
    reply: std::result::Result<HttpResponse, TransportError>,
    poll_url: &str,
) -> Result<LoginStatus> {
    let res = match reply {
        Ok(res) => res,
        Err(TransportError::Timeout) => return Ok(LoginStatus::Pending),
        Err(e) => return Err(e.into()),
    };

    if PENDING_HTTP_STATUSES.contains(&res.status) {
        return Ok(LoginStatus::Pending);
    }
    if !res.is_success() {
        return Err(Error::Transport {
            status: res.status,
            url: poll_url.to_string(),
        });
    }

    match response::decode(&res.body) {
        Ok(data) => classify_payload(&data),
        Err(_) => Ok(legacy_redirect(&res).unwrap_or(LoginStatus::Pending)),
    }
}

fn classify_payload(data: &Value) -> Result<LoginStatus> {
    let ssecurity = data["ssecurity"].as_str().filter(|s| !s.is_empty());
    let user_id = &data["userId"];
    if let (Some(ssecurity), false) = (ssecurity, user_id.is_null()) {
        let token = AuthToken {
            ssecurity: ssecurity.to_string(),
            user_id: user_id.clone(),
            pass_token: data["passToken"].as_str().map(str::to_string),
            location: data["location"].as_str().map(str::to_string),
        };
        let auth_token = serde_json::to_string(&token)
            .map_err(|e| Error::Protocol(format!("cannot encode auth token: {}", e)))?;
        return Ok(LoginStatus::Confirmed { auth_token });
    }

    let code = data["code"].as_i64();
    if code == Some(0) || data["status"].as_i64() == Some(0) {
        return Ok(LoginStatus::Pending);
    }
    if let Some(code) = code {
        let message = ["desc", "description", "message"]
            .iter()
            .find_map(|k| data[*k].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("login failed with code {}", code));
        return Ok(LoginStatus::Error { message });
    }

    Ok(LoginStatus::Pending)
}

/// Older servers answer with a redirect whose body is not JSON.
fn legacy_redirect(res: &HttpResponse) -> Option<LoginStatus> {
    if !(res.body.contains("location") || res.body.contains("serviceToken")) {
        return None;
    }
    res.header(header::LOCATION.as_str())
        .map(|location| LoginStatus::Confirmed {
            auth_token: location.to_string(),
        })
}
