use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::parse_result;
use crate::error::Result;
use crate::{serde_value_to_string, MiCloudClient};

const BLE_DID_PREFIX: &str = "blt.";

/// BLE devices are the ones whose `did` starts with `blt.`.
pub fn is_ble_did(did: &str) -> bool {
    did.starts_with(BLE_DID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub did: String,
    pub name: String,
    pub model: String,
    pub mac: String,
    pub is_ble: bool,
    /// Gateway the device is reached through, for BLE sub-devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
struct RawDevice {
    did: Option<String>,
    name: Option<String>,
    model: Option<String>,
    mac: Option<String>,
    parent_id: Option<String>,
}

impl RawDevice {
    fn into_device(self) -> Option<Device> {
        let did = self.did.filter(|d| !d.is_empty())?;
        Some(Device {
            is_ble: is_ble_did(&did),
            did,
            name: self.name.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            mac: self.mac.unwrap_or_default(),
            parent_id: self.parent_id.filter(|p| !p.is_empty()),
        })
    }
}

#[derive(Deserialize, Default)]
struct DeviceListResponse {
    #[serde(default)]
    list: Vec<RawDevice>,
}

#[derive(Deserialize)]
struct Home {
    id: Value,
}

#[derive(Deserialize, Default)]
struct HomeListResponse {
    #[serde(default)]
    homelist: Vec<Home>,
}

#[derive(Deserialize, Default)]
struct HomeDeviceListResponse {
    #[serde(default)]
    device_info: Vec<RawDevice>,
}

/// Flat device list with first-seen-wins deduplication on `did`.
#[derive(Default)]
struct DeviceCollector {
    seen: HashSet<String>,
    devices: Vec<Device>,
}

impl DeviceCollector {
    fn extend(&mut self, raw: Vec<RawDevice>) {
        for device in raw.into_iter().filter_map(RawDevice::into_device) {
            if self.seen.insert(device.did.clone()) {
                self.devices.push(device);
            }
        }
    }
}

impl MiCloudClient {
    /// Every device on the account. Re-queried on every call.
    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        let devices = self.devices_from_device_list().await?;
        if !devices.is_empty() {
            return Ok(devices);
        }

        debug!("device_list is empty, enumerating devices per home");
        self.devices_from_homes().await
    }

    async fn devices_from_device_list(&self) -> Result<Vec<Device>> {
        let req = json!({
            "getVirtualModel": true,
            "getHuamiDevices": 1,
            "get_split_device": false,
            "support_smart_home": true,
            "fetch_share_dev": true
        });
        let res: DeviceListResponse = parse_result(self.request("/home/device_list", req).await?)?;

        let mut collector = DeviceCollector::default();
        collector.extend(res.list);
        Ok(collector.devices)
    }

    async fn devices_from_homes(&self) -> Result<Vec<Device>> {
        let req = json!({ "fg": true, "fetch_share": true, "limit": 300 });
        let homes: HomeListResponse =
            parse_result(self.request("/v2/homeroom/gethome", req).await?)?;

        let mut collector = DeviceCollector::default();
        for home in homes.homelist {
            let req = json!({ "home_id": home.id.clone(), "limit": 200 });
            let res = self
                .request("/v2/home/home_device_list", req)
                .await
                .and_then(parse_result::<HomeDeviceListResponse>);
            match res {
                Ok(res) => collector.extend(res.device_info),
                Err(e) => warn!(
                    "Skipping home {}: {}",
                    serde_value_to_string(&home.id),
                    e
                ),
            }
        }
        Ok(collector.devices)
    }
}
