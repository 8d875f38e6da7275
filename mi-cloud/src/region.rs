use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

const XIAOMI_API_HOST: &str = "api.io.mi.com/app";

/// Mi Cloud server region. Decides which API host signed requests go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Cn,
    De,
    Us,
    Ru,
    Tw,
    Sg,
    In,
    I2,
}

impl Region {
    pub const ALL: [Region; 8] = [
        Region::Cn,
        Region::De,
        Region::Us,
        Region::Ru,
        Region::Tw,
        Region::Sg,
        Region::In,
        Region::I2,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Region::Cn => "cn",
            Region::De => "de",
            Region::Us => "us",
            Region::Ru => "ru",
            Region::Tw => "tw",
            Region::Sg => "sg",
            Region::In => "in",
            Region::I2 => "i2",
        }
    }

    // https://www.openhab.org/addons/bindings/miio/#country-servers
    pub fn display_name(self) -> &'static str {
        match self {
            Region::Cn => "China",
            Region::De => "Germany",
            Region::Us => "USA",
            Region::Ru => "Russia",
            Region::Tw => "Taiwan",
            Region::Sg => "Singapore",
            Region::In => "India",
            Region::I2 => "India (i2)",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        Region::ALL
            .into_iter()
            .find(|region| region.code() == code)
            .ok_or_else(|| Error::Validation(format!("unsupported region '{}'", s)))
    }
}

/// `https://api.io.mi.com/app` for China, `https://{region}.api.io.mi.com/app` elsewhere.
pub fn build_api_base_url(region: Region) -> String {
    match region {
        Region::Cn => format!("https://{}", XIAOMI_API_HOST),
        other => format!("https://{}.{}", other.code(), XIAOMI_API_HOST),
    }
}
