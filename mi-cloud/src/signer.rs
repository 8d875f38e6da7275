//! Request signing for the authenticated Mi Cloud API.
//!
//! Every signed call carries a fresh `_nonce`, and a `signature` keyed by the
//! "signed nonce" (`SHA256(ssecurity ++ nonce)`).

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{thread_rng, Rng};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Output of [`sign`]: the three values that end up in the form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub signature: String,
    pub nonce: String,
    pub params: String,
}

/// 8 random bytes followed by the big-endian minute counter, base64 encoded.
pub fn generate_nonce(now: DateTime<Utc>) -> String {
    let mut buf = [0u8; 12];
    buf[..8].copy_from_slice(&thread_rng().gen::<[u8; 8]>());
    let minutes = (now.timestamp_millis().max(0) / 60_000) as u32;
    buf[8..].copy_from_slice(&minutes.to_be_bytes());
    STANDARD.encode(buf)
}

pub fn signed_nonce(ssecurity: &str, nonce: &str) -> Result<String> {
    let secret_bytes = decode_base64(ssecurity, "ssecurity")?;
    let nonce_bytes = decode_base64(nonce, "nonce")?;
    let mut hasher = Sha256::new();
    hasher.update(&secret_bytes);
    hasher.update(&nonce_bytes);
    Ok(STANDARD.encode(hasher.finalize()))
}

/// HMAC-SHA256 over `path&signed_nonce&nonce&data=<params>`.
///
/// The pieces are joined verbatim, nothing is URL-encoded here.
pub fn generate_signature(
    path: &str,
    signed_nonce: &str,
    nonce: &str,
    params: &str,
) -> Result<String> {
    let signature_base = [
        path.to_string(),
        signed_nonce.to_string(),
        nonce.to_string(),
        format!("data={}", params),
    ]
    .join("&");

    let key = decode_base64(signed_nonce, "signed nonce")?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| Error::Validation(format!("invalid hmac key: {}", e)))?;
    mac.update(signature_base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn sign(path: &str, data: &Value, ssecurity: &str, now: DateTime<Utc>) -> Result<SignedRequest> {
    sign_with_nonce(path, data, ssecurity, generate_nonce(now))
}

/// Same as [`sign`] with a caller-provided nonce.
pub fn sign_with_nonce(
    path: &str,
    data: &Value,
    ssecurity: &str,
    nonce: String,
) -> Result<SignedRequest> {
    let signed = signed_nonce(ssecurity, &nonce)?;
    let params = serde_json::to_string(data)
        .map_err(|e| Error::Validation(format!("request data is not serializable: {}", e)))?;
    let signature = generate_signature(path, &signed, &nonce, &params)?;

    Ok(SignedRequest {
        signature,
        nonce,
        params,
    })
}

fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::Validation(format!("{} is not valid base64: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SSECURITY: &str = "9wR21gAtfAyn+KDX1ok/Iw==";
    const NONCE: &str = "BejIOTLgvecBs9sT";

    #[test]
    fn signed_nonce() {
        let result = super::signed_nonce(SSECURITY, NONCE).unwrap();
        assert_eq!(result, "zq3TaSr/VwnmvvWwMTAEMAuzxs2gLgP6uFJS7bBtWKo=");
    }

    #[test]
    fn signed_nonce_depends_on_both_inputs() {
        let base = super::signed_nonce(SSECURITY, NONCE).unwrap();
        assert_eq!(base, super::signed_nonce(SSECURITY, NONCE).unwrap());
        assert_ne!(base, super::signed_nonce("AAAAAAAAAAAAAAAAAAAAAA==", NONCE).unwrap());
        assert_ne!(base, super::signed_nonce(SSECURITY, "AAAAAAAAAAAAAAAA").unwrap());
    }

    #[test]
    fn signed_nonce_rejects_garbage_secret() {
        let err = super::signed_nonce("not base64!", NONCE).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn generate_signature() {
        let result = super::generate_signature(
            "/home/device_list",
            "zq3TaSr/VwnmvvWwMTAEMAuzxs2gLgP6uFJS7bBtWKo=",
            NONCE,
            r#"{"getHuamiDevices":0,"getVirtualModel":false}"#,
        )
        .unwrap();
        assert_eq!(result, "6KEUC7sycg/Vhh0Jz7bZqT1JCza7bv36B3WcKnuW9J8=");
    }

    #[test]
    fn sign_with_fixed_nonce_matches_manual_hmac() {
        let data = json!({"did": "blt.3.abc", "pdid": 1});
        let signed = sign_with_nonce(
            "/v2/device/blt_get_beaconkey",
            &data,
            SSECURITY,
            NONCE.to_string(),
        )
        .unwrap();

        let signed_nonce = super::signed_nonce(SSECURITY, NONCE).unwrap();
        let base = format!(
            "/v2/device/blt_get_beaconkey&{}&{}&data={}",
            signed_nonce, NONCE, r#"{"did":"blt.3.abc","pdid":1}"#
        );
        let mut mac = HmacSha256::new_from_slice(&STANDARD.decode(&signed_nonce).unwrap()).unwrap();
        mac.update(base.as_bytes());
        let expect = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(signed.nonce, NONCE);
        assert_eq!(signed.params, r#"{"did":"blt.3.abc","pdid":1}"#);
        assert_eq!(signed.signature, expect);
    }

    #[test]
    fn nonce_layout() {
        let now = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        let nonce = generate_nonce(now);
        let raw = STANDARD.decode(&nonce).unwrap();

        assert_eq!(raw.len(), 12);
        let minutes = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
        assert_eq!(minutes, (1_700_000_123_456u64 / 60_000) as u32);
        assert_ne!(nonce, generate_nonce(now));
    }
}
