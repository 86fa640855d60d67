//! Device resolution and listing.
//!
//! Resolves a [`DeviceTarget`] to a connectable peripheral, scanning the
//! radio when the target is a name or id string, and exposes a one-shot
//! snapshot of currently visible devices.

use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::BleSerialConfig;
use crate::endpoint::EndpointIdentity;
use crate::error::{BleSerialError, Result};

// ----------------------------------------------------------------------------
// Targets and Snapshots
// ----------------------------------------------------------------------------

/// How a stream instance names the device it should attach to.
///
/// Resolved exactly once, when the connection attempt starts.
#[derive(Debug, Clone)]
pub enum DeviceTarget {
    /// Match by advertised local name, peripheral id, or address string.
    /// Resolution scans until a match appears or the scan window closes.
    ByNameOrId(String),
    /// An already-resolved peripheral handle, used unchanged.
    ByDescriptor(Peripheral),
}

/// One entry of the device-listing snapshot.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Platform peripheral id, usable as a `ByNameOrId` query
    pub id: String,
    /// Advertised local name, when the device exposes one
    pub name: Option<String>,
    /// Bluetooth address, when the platform reports one
    pub address: Option<String>,
    /// Signal strength at snapshot time
    pub rssi: Option<i16>,
}

// ----------------------------------------------------------------------------
// Adapter and Resolution
// ----------------------------------------------------------------------------

/// First available BLE adapter on the host.
pub(crate) async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|_| BleSerialError::AdapterUnavailable)?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|_| BleSerialError::AdapterUnavailable)?;
    adapters
        .into_iter()
        .next()
        .ok_or(BleSerialError::AdapterUnavailable)
}

/// Resolve a target to a connectable peripheral.
pub(crate) async fn resolve(
    adapter: &Adapter,
    target: DeviceTarget,
    identity: &EndpointIdentity,
    config: &BleSerialConfig,
) -> Result<Peripheral> {
    match target {
        DeviceTarget::ByDescriptor(peripheral) => Ok(peripheral),
        DeviceTarget::ByNameOrId(query) => scan_for(adapter, &query, identity, config).await,
    }
}

/// Scan for a peripheral matching the query, filtered by the service UUID.
async fn scan_for(
    adapter: &Adapter,
    query: &str,
    identity: &EndpointIdentity,
    config: &BleSerialConfig,
) -> Result<Peripheral> {
    let mut events = adapter
        .events()
        .await
        .map_err(|e| BleSerialError::ScanFailed(e.to_string()))?;

    adapter
        .start_scan(ScanFilter {
            services: vec![identity.service],
        })
        .await
        .map_err(|e| BleSerialError::ScanFailed(e.to_string()))?;
    info!("Scanning for device \"{}\"", query);

    let found = tokio::time::timeout(config.scan_timeout, async {
        // A previously paired device may be known before any fresh event
        if let Some(peripheral) = match_known(adapter, query).await {
            return Some(peripheral);
        }
        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    if let Ok(peripheral) = adapter.peripheral(&id).await {
                        if matches_query(&peripheral, query).await {
                            return Some(peripheral);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    })
    .await;

    let _ = adapter.stop_scan().await;

    match found {
        Ok(Some(peripheral)) => {
            debug!("Resolved \"{}\" to {}", query, peripheral.id());
            Ok(peripheral)
        }
        _ => Err(BleSerialError::DeviceNotFound(query.to_string())),
    }
}

async fn match_known(adapter: &Adapter, query: &str) -> Option<Peripheral> {
    let peripherals = adapter.peripherals().await.ok()?;
    for peripheral in peripherals {
        if matches_query(&peripheral, query).await {
            return Some(peripheral);
        }
    }
    None
}

async fn matches_query(peripheral: &Peripheral, query: &str) -> bool {
    if peripheral.id().to_string() == query {
        return true;
    }
    if let Ok(Some(properties)) = peripheral.properties().await {
        if properties.local_name.as_deref() == Some(query) {
            return true;
        }
        if properties
            .address
            .to_string()
            .eq_ignore_ascii_case(query)
        {
            return true;
        }
    }
    false
}

// ----------------------------------------------------------------------------
// Device Listing
// ----------------------------------------------------------------------------

/// Snapshot of currently visible devices after one scan window.
///
/// Finite and consumed per call; this is not a live subscription. The scan is
/// unfiltered so the caller sees every candidate, not only serial endpoints.
pub async fn list_available_devices(scan_window: Duration) -> Result<Vec<DeviceInfo>> {
    let adapter = default_adapter().await?;

    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| BleSerialError::ScanFailed(e.to_string()))?;
    tokio::time::sleep(scan_window).await;
    let _ = adapter.stop_scan().await;

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| BleSerialError::ScanFailed(e.to_string()))?;

    let mut devices = Vec::with_capacity(peripherals.len());
    for peripheral in peripherals {
        let properties = peripheral.properties().await.ok().flatten();
        let (name, address, rssi) = match properties {
            Some(props) => (
                props.local_name,
                Some(props.address.to_string()),
                props.rssi,
            ),
            None => (None, None, None),
        };
        devices.push(DeviceInfo {
            id: peripheral.id().to_string(),
            name,
            address,
            rssi,
        });
    }
    info!("Device listing snapshot: {} candidates", devices.len());
    Ok(devices)
}
