use std::sync::OnceLock;

use log::{debug, info, warn};
use regex::Regex;
use reqwest::header;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::qr_login::AuthToken;
use crate::region::Region;
use crate::response;
use crate::session::SessionState;
use crate::transport::{HttpRequest, HttpResponse};
use crate::{lock, serde_value_to_string, MiCloudClient};

/// Everything a serviceToken can be recovered from after a confirmed QR login.
struct TokenSources<'a> {
    location_response: Option<&'a HttpResponse>,
    pass_token: Option<&'a str>,
}

type TokenStrategy = fn(&TokenSources<'_>) -> Option<String>;

/// Tried in order; the first hit wins.
const SERVICE_TOKEN_STRATEGIES: [(&str, TokenStrategy); 3] = [
    ("set-cookie", token_from_set_cookie),
    ("response body", token_from_body),
    ("passToken", token_from_pass_token),
];

impl MiCloudClient {
    /// Turns the `authToken` of a confirmed poll into a live session for `region`.
    pub async fn complete_login(&self, auth_token: &str, region: Region) -> Result<()> {
        let _guard = self.login_guard.lock().await;

        let token = parse_auth_token(auth_token)?;
        let location_response = match token.location.as_deref() {
            Some(location) => self.follow_location(location).await,
            None => None,
        };

        let sources = TokenSources {
            location_response: location_response.as_ref(),
            pass_token: token.pass_token.as_deref(),
        };
        let (source, service_token) = SERVICE_TOKEN_STRATEGIES
            .iter()
            .find_map(|(name, strategy)| strategy(&sources).map(|t| (*name, t)))
            .ok_or_else(|| Error::Protocol("could not obtain a serviceToken".into()))?;
        debug!("serviceToken taken from {}", source);

        let user_id = serde_value_to_string(&token.user_id);
        let now = self.now();
        *lock(&self.session) = SessionState {
            user_id: Some(user_id.clone()),
            service_token: Some(service_token),
            ssecurity: Some(token.ssecurity),
            region: Some(region),
            expires_at: Some(self.deadline(now, self.config.session_ttl)),
        };
        info!("Logged in to Mi Cloud as user {} ({})", user_id, region);

        Ok(())
    }

    async fn follow_location(&self, location: &str) -> Option<HttpResponse> {
        let request =
            HttpRequest::get(location).header(header::USER_AGENT.as_str(), &self.user_agent);
        match self.transport.send(request).await {
            Ok(res) => Some(res),
            Err(e) => {
                warn!("Could not follow login location: {}", e);
                None
            }
        }
    }
}

fn parse_auth_token(auth_token: &str) -> Result<AuthToken> {
    let value: Value = serde_json::from_str(auth_token)
        .map_err(|_| Error::Validation("auth token is not a JSON object".into()))?;

    let ssecurity = value["ssecurity"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("auth token has no ssecurity".into()))?;
    let user_id = &value["userId"];
    if user_id.is_null() || serde_value_to_string(user_id).is_empty() {
        return Err(Error::Validation("auth token has no userId".into()));
    }

    Ok(AuthToken {
        ssecurity: ssecurity.to_string(),
        user_id: user_id.clone(),
        pass_token: value["passToken"].as_str().map(str::to_string),
        location: value["location"].as_str().map(str::to_string),
    })
}

fn service_token_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:^|[;,\s])serviceToken=([^;,\s]+)").ok())
        .as_ref()
}

fn token_from_set_cookie(sources: &TokenSources<'_>) -> Option<String> {
    let pattern = service_token_pattern()?;
    sources
        .location_response?
        .header_values(header::SET_COOKIE.as_str())
        .find_map(|cookie| pattern.captures(cookie))
        .map(|caps| caps[1].to_string())
}

fn token_from_body(sources: &TokenSources<'_>) -> Option<String> {
    let data = response::decode_embedded(&sources.location_response?.body).ok()?;
    data["serviceToken"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn token_from_pass_token(sources: &TokenSources<'_>) -> Option<String> {
    sources
        .pass_token
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
