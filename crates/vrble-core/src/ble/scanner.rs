//! BLE Scanner - 发现 Quest 文件传输外设
//!
//! 使用 btleplug 扫描附近设备，按名称片段或精确地址筛选目标。
//!
//! # 设备识别
//!
//! - 名称包含指定片段 (默认 `Quest`)
//! - 或地址/外设标识与指定值完全一致 (忽略大小写)
//!
//! macOS 下 CoreBluetooth 不暴露 MAC 地址，外设标识是一个 UUID，
//! 因此地址同时与 `address` 和 `id` 比较；此时 `address` 恒为全零，不参与识别。

use log::{debug, info, warn};

use crate::ble::client::{BleClientError, default_adapter};
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time;

/// `BDAddr::default()` 的文本形式
const UNKNOWN_ADDRESS: &str = "00:00:00:00:00:00";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
    pub id: String,
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<Unknown>")
    }

    /// 后端是否报告了真实地址 (CoreBluetooth 下恒为全零)
    pub fn has_known_address(&self) -> bool {
        self.address != UNKNOWN_ADDRESS
    }

    /// 地址或外设标识是否与给定值一致
    ///
    /// 全零地址不参与比较。
    pub fn has_address(&self, address: &str) -> bool {
        (self.has_known_address() && self.address.eq_ignore_ascii_case(address))
            || self.id.eq_ignore_ascii_case(address)
    }

    /// 是否与扫描时记录的设备是同一个外设
    pub fn is_same_peripheral(&self, other: &DiscoveredDevice) -> bool {
        self.id == other.id
            || (self.has_known_address()
                && other.has_known_address()
                && self.address.eq_ignore_ascii_case(&other.address))
    }
}

/// 目标设备筛选条件
///
/// 两个条件满足其一即匹配；都未设置时不匹配任何设备。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub name_contains: Option<String>,
    pub address: Option<String>,
}

impl DeviceFilter {
    pub fn new(name_contains: Option<String>, address: Option<String>) -> Self {
        Self {
            name_contains: name_contains.filter(|s| !s.is_empty()),
            address: address.filter(|s| !s.is_empty()),
        }
    }

    pub fn by_name(pattern: impl Into<String>) -> Self {
        Self::new(Some(pattern.into()), None)
    }

    pub fn by_address(address: impl Into<String>) -> Self {
        Self::new(None, Some(address.into()))
    }

    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        let name_match = match (&self.name_contains, &device.name) {
            (Some(pattern), Some(name)) => name.contains(pattern.as_str()),
            _ => false,
        };
        let address_match = self
            .address
            .as_deref()
            .is_some_and(|addr| device.has_address(addr));

        name_match || address_match
    }
}

impl std::fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name_contains, &self.address) {
            (Some(name), Some(addr)) => write!(f, "name~'{name}' or address={addr}"),
            (Some(name), None) => write!(f, "name~'{name}'"),
            (None, Some(addr)) => write!(f, "address={addr}"),
            (None, None) => write!(f, "<empty filter>"),
        }
    }
}

pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub async fn new() -> Result<Self, BleClientError> {
        Ok(Self {
            adapter: default_adapter().await?,
        })
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// 扫描至多 `timeout`，返回第一个匹配的设备
    ///
    /// 未找到不是错误，返回 `Ok(None)`，由调用方决定放弃还是重试。
    pub async fn discover(
        &self,
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>, BleClientError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        info!(
            "Starting BLE scan for {:.1} seconds ({})",
            timeout.as_secs_f32(),
            filter
        );

        let result = self.wait_for_match(&mut events, filter, timeout).await;
        self.stop_scan().await;

        let found = result?;
        match &found {
            Some(device) => info!(
                "Found target device: name='{}', addr={}",
                device.display_name(),
                device.address
            ),
            None => info!("Scan complete: no device matched {}", filter),
        }

        Ok(found)
    }

    async fn wait_for_match(
        &self,
        events: &mut (impl Stream<Item = CentralEvent> + Unpin),
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>, BleClientError> {
        // 扫描开始前已缓存的设备
        let cached = describe_all(&self.adapter.peripherals().await?).await;
        if let Some(device) = cached.into_iter().find(|d| filter.matches(d)) {
            debug!("Matched cached device: {:?}", device);
            return Ok(Some(device));
        }

        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => return Ok(None),
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                        let peripheral = match self.adapter.peripheral(&id).await {
                            Ok(p) => p,
                            Err(e) => {
                                debug!("Peripheral {:?} disappeared: {}", id, e);
                                continue;
                            }
                        };
                        if let Some(device) = describe_or_skip(&peripheral).await {
                            debug!(
                                "Seen device: name='{}', addr={}, rssi={:?}",
                                device.display_name(),
                                device.address,
                                device.rssi
                            );
                            if filter.matches(&device) {
                                return Ok(Some(device));
                            }
                        }
                    }
                    Some(_) => {}
                    None => return Ok(None),
                }
            }
        }
    }

    /// 扫描 `timeout` 后返回所有见到的设备
    pub async fn list(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, BleClientError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Starting BLE scan for {} seconds", timeout.as_secs());

        time::sleep(timeout).await;

        let result = self.adapter.peripherals().await;
        self.stop_scan().await;

        let mut discovered = HashMap::new();
        for device in describe_all(&result?).await {
            discovered.insert(device.id.clone(), device);
        }

        let mut devices: Vec<_> = discovered.into_values().collect();
        // 信号强的在前
        devices.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));

        info!("Scan complete: found {} device(s)", devices.len());
        Ok(devices)
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }
}

async fn describe_all(peripherals: &[Peripheral]) -> Vec<DiscoveredDevice> {
    let mut devices = Vec::with_capacity(peripherals.len());
    for peripheral in peripherals {
        if let Some(device) = describe_or_skip(peripheral).await {
            devices.push(device);
        }
    }
    devices
}

pub(crate) async fn describe_or_skip(peripheral: &Peripheral) -> Option<DiscoveredDevice> {
    readable(describe(peripheral).await, &peripheral.id())
}

/// 读取属性失败的外设 (例如已被移除) 直接跳过，不影响整次扫描
fn readable(
    described: Result<Option<DiscoveredDevice>, BleClientError>,
    id: &impl std::fmt::Debug,
) -> Option<DiscoveredDevice> {
    match described {
        Ok(device) => device,
        Err(e) => {
            debug!("Skipping peripheral {:?}: {}", id, e);
            None
        }
    }
}

async fn describe(peripheral: &Peripheral) -> Result<Option<DiscoveredDevice>, BleClientError> {
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    Ok(Some(DiscoveredDevice {
        name: props.local_name,
        address: props.address.to_string(),
        id: peripheral.id().to_string(),
        rssi: props.rssi,
    }))
}
