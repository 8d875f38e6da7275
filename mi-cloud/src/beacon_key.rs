use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::parse_result;
use crate::devices::is_ble_did;
use crate::error::{Error, Result};
use crate::MiCloudClient;

/// Key material for decrypting a device's MiBeacon advertisements.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BleKeyResult {
    pub did: String,
    pub mac: String,
    pub beacon_key: String,
}

impl fmt::Debug for BleKeyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleKeyResult")
            .field("did", &self.did)
            .field("mac", &self.mac)
            .field("beacon_key", &"REDACTED")
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct BeaconKeyResponse {
    beaconkey: Option<String>,
    mac: Option<String>,
}

impl MiCloudClient {
    pub async fn get_ble_key(&self, did: &str) -> Result<BleKeyResult> {
        if !is_ble_did(did) {
            return Err(Error::Validation(format!("{} is not a BLE device", did)));
        }

        let req = json!({ "did": did, "pdid": 1 });
        let res: BeaconKeyResponse =
            parse_result(self.request("/v2/device/blt_get_beaconkey", req).await?)?;
        let beacon_key = res
            .beaconkey
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Protocol(format!("no beacon key returned for {}", did)))?;

        Ok(BleKeyResult {
            did: did.to_string(),
            mac: res.mac.unwrap_or_default(),
            beacon_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[tokio::test]
    async fn rejects_non_ble_ids_before_any_request() {
        let h = harness();
        let err = h.client.get_ble_key("not-a-ble-id").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn returns_key_and_mac() {
        let h = logged_in().await;
        h.transport.respond(
            &api("/v2/device/blt_get_beaconkey"),
            200,
            r#"{"code":0,"result":{"beaconkey":"AABB","mac":"11:22:33:44:55:66"}}"#,
        );

        let key = h.client.get_ble_key("blt.123").await.unwrap();
        assert_eq!(
            key,
            BleKeyResult {
                did: "blt.123".to_string(),
                mac: "11:22:33:44:55:66".to_string(),
                beacon_key: "AABB".to_string(),
            }
        );

        let sent = &h.transport.requests()[0];
        let body = urlencoding::decode(sent.body.as_deref().unwrap()).unwrap().into_owned();
        assert!(body.contains(r#"data={"did":"blt.123","pdid":1}"#));
    }

    #[tokio::test]
    async fn missing_key_is_protocol_error() {
        let h = logged_in().await;
        h.transport.respond(
            &api("/v2/device/blt_get_beaconkey"),
            200,
            r#"{"code":0,"result":{"mac":"11:22:33:44:55:66"}}"#,
        );
        assert!(matches!(
            h.client.get_ble_key("blt.123").await,
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn debug_hides_key() {
        let key = BleKeyResult {
            did: "blt.1".into(),
            mac: "m".into(),
            beacon_key: "secret".into(),
        };
        assert!(!format!("{:?}", key).contains("secret"));
    }
}
