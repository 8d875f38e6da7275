use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::warn;
use mi_cloud::{BleKeyResult, Device, LoginStatus, MiCloudClient, Region};
use serde::Serialize;

/// Log in to Mi Cloud with a QR code and print the BLE beacon keys of your devices.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Mi Cloud server region: cn, de, us, ru, tw, sg, in or i2.
    #[arg(long, default_value = "cn")]
    region: String,

    /// Seconds between login status polls.
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,

    /// Only fetch the key of this device id (must start with "blt.").
    #[arg(long)]
    did: Option<String>,

    /// Print the result as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    devices: Vec<Device>,
    keys: Vec<BleKeyResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let region: Region = args.region.parse()?;

    let mi = MiCloudClient::new().context("Failed to set up the HTTP client")?;

    let auth_token = qr_login(&mi, Duration::from_secs(args.poll_interval.max(1))).await?;
    mi.complete_login(&auth_token, region)
        .await
        .context("Login could not be completed")?;
    eprintln!("Logged in ({}).", region.display_name());

    let devices = mi.get_devices().await.context("Failed to fetch devices")?;
    let keys = fetch_keys(&mi, &devices, args.did.as_deref()).await?;
    let report = Report { devices, keys };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    mi.logout();
    Ok(())
}

async fn qr_login(mi: &MiCloudClient, interval: Duration) -> Result<String> {
    let started = mi.start_qr_login().await.context("Failed to start QR login")?;

    eprintln!("\nScan this QR code with the Mi Home app:\n  {}", started.qr_code_url);
    if let Some(login_url) = &started.login_url {
        eprintln!("or open this link on a logged-in phone:\n  {}", login_url);
    }
    eprintln!("Waiting for confirmation...");

    loop {
        match mi.poll_login_status(&started.session_id).await? {
            LoginStatus::Confirmed { auth_token } => return Ok(auth_token),
            LoginStatus::Expired => bail!("The QR code expired, please log in again"),
            LoginStatus::Error { message } => {
                bail!("Login failed: {}. Please log in again", message)
            }
            LoginStatus::Pending | LoginStatus::Scanned => tokio::time::sleep(interval).await,
        }
    }
}

async fn fetch_keys(
    mi: &MiCloudClient,
    devices: &[Device],
    did: Option<&str>,
) -> Result<Vec<BleKeyResult>> {
    if let Some(did) = did {
        let key = mi
            .get_ble_key(did)
            .await
            .with_context(|| format!("Failed to get the beacon key of {}", did))?;
        return Ok(vec![key]);
    }

    let mut keys = Vec::new();
    for device in devices.iter().filter(|d| d.is_ble) {
        match mi.get_ble_key(&device.did).await {
            Ok(key) => keys.push(key),
            Err(e) => warn!("No beacon key for {} ({}): {}", device.name, device.did, e),
        }
    }
    Ok(keys)
}

fn print_report(report: &Report) {
    println!("\nDevices:");
    for (i, d) in report.devices.iter().enumerate() {
        println!(
            "{:>3}. {} {:<28} {:<28} {:<18} {}",
            i + 1,
            if d.is_ble { "[BLE]" } else { "     " },
            d.name,
            d.model,
            d.mac,
            d.did
        );
    }
    if report.devices.is_empty() {
        println!("No devices found. Is the region right?");
    }

    println!("\nBeacon keys:");
    println!("{:<24} | {:<18} | {}", "did", "mac", "beacon key");
    println!("{:-<24}-+-{:-<18}-+-{:-<32}", "", "", "");
    for key in &report.keys {
        println!("{:<24} | {:<18} | {}", key.did, key.mac, key.beacon_key);
    }
}
