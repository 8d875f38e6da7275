use log::debug;
use reqwest::header;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::response::{self, DecodeError};
use crate::session::Credentials;
use crate::signer;
use crate::transport::HttpRequest;
use crate::{encode_query, lock, MiCloudClient};

#[derive(Deserialize)]
struct MiCloudErrorMessage {
    message: Option<String>,
}

/// `{code, message, result}`; some failures nest the message under `error`.
#[derive(Deserialize)]
struct MiCloudEnvelope {
    code: Option<i64>,
    message: Option<String>,
    error: Option<MiCloudErrorMessage>,
    #[serde(default)]
    result: Value,
}

impl MiCloudClient {
    /// Signed POST against the regional API host. Returns the envelope's `result`.
    pub(crate) async fn request(&self, path: &str, data: Value) -> Result<Value> {
        let now = self.now();
        let credentials = lock(&self.session)
            .credentials(now)
            .ok_or(Error::NotAuthenticated)?;

        let signed = signer::sign(path, &data, &credentials.ssecurity, now)?;
        let url = format!(
            "{}{}",
            self.config.endpoints.api_base_url(credentials.region),
            path
        );
        let body = encode_query(&[
            ("_nonce", signed.nonce.as_str()),
            ("data", signed.params.as_str()),
            ("signature", signed.signature.as_str()),
        ]);

        debug!("POST {}", url);
        let res = self
            .transport
            .send(
                HttpRequest::post(&url)
                    .header(header::USER_AGENT.as_str(), &self.user_agent)
                    .header("x-xiaomi-protocal-flag-cli", "PROTOCAL-HTTP2")
                    .header(
                        header::CONTENT_TYPE.as_str(),
                        "application/x-www-form-urlencoded",
                    )
                    .header(header::COOKIE.as_str(), self.cookie(&credentials))
                    .body(body),
            )
            .await?;

        if !res.is_success() {
            return Err(Error::Transport {
                status: res.status,
                url,
            });
        }

        unwrap_envelope(response::decode(&res.body)?)
    }

    fn cookie(&self, credentials: &Credentials) -> String {
        format!(
            "userId={};serviceToken={};locale={}",
            credentials.user_id, credentials.service_token, self.config.locale
        )
    }
}

fn unwrap_envelope(body: Value) -> Result<Value> {
    let envelope: MiCloudEnvelope = serde_json::from_value(body).map_err(DecodeError::from)?;
    match envelope.code {
        Some(0) => Ok(envelope.result),
        code => {
            let message = envelope
                .message
                .or(envelope.error.and_then(|e| e.message))
                .unwrap_or_else(|| "request failed".to_string());
            Err(Error::Api {
                code: code.unwrap_or(-1),
                message,
            })
        }
    }
}

/// Deserializes a `result`, treating `null` as the empty value.
pub(crate) fn parse_result<T: DeserializeOwned + Default>(result: Value) -> Result<T> {
    if result.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(result).map_err(DecodeError::from)?)
}
