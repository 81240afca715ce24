use crate::ble::gatt::{GattLink, Radio, with_timeout};
use crate::ble::scanner::{BleScanner, DeviceFilter, DiscoveredDevice, describe_or_skip};
use crate::ble::{REQUIRED_CHARACTERISTICS, SERVICE_UUID};
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// BLE 客户端错误
#[derive(Debug, thiserror::Error)]
pub enum BleClientError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] btleplug::Error),
}

/// 获取第一个蓝牙适配器
pub(crate) async fn default_adapter() -> Result<Adapter, BleClientError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BleClientError::NoAdapter)
}

/// 基于 btleplug 的 [`Radio`] 实现
pub struct BleClient {
    adapter: Adapter,
    io_timeout: Option<Duration>,
    /// 被丢弃的 link 补发的断开任务
    releases: TaskTracker,
}

impl BleClient {
    pub async fn new() -> Result<Self, BleClientError> {
        Ok(Self {
            adapter: default_adapter().await?,
            io_timeout: None,
            releases: TaskTracker::new(),
        })
    }

    /// 为每次特征读写设置超时
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 等待被丢弃的 link 完成断开，至多 `grace`
    ///
    /// 进程退出前调用；运行时关闭时未完成的断开任务会被直接丢弃。
    pub async fn wait_released(&self, grace: Duration) -> bool {
        self.releases.close();
        let released = tokio::time::timeout(grace, self.releases.wait())
            .await
            .is_ok();
        if !released {
            log::warn!("Connection release did not finish within {:?}", grace);
        }
        released
    }

    /// 连接到设备并发现文件传输服务
    pub async fn connect_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<BtleplugLink, BleClientError> {
        // 扫描与连接之间设备可能已消失
        let peripheral = self.find_device(device).await?;

        log::info!("Connecting to {}", device.address);
        peripheral.connect().await.map_err(|e| match e {
            btleplug::Error::DeviceNotFound => BleClientError::DeviceNotFound,
            other => BleClientError::ConnectionFailed(other.to_string()),
        })?;

        // 连接成功后由 link 负责断开
        let mut link = BtleplugLink {
            peripheral,
            characteristics: HashMap::new(),
            io_timeout: self.io_timeout,
            closed: AtomicBool::new(false),
            releases: self.releases.clone(),
        };

        log::info!("Discovering services...");
        link.peripheral.discover_services().await?;
        link.characteristics = find_characteristics(&link.peripheral)?;

        log::debug!(
            "Indexed {} characteristics of service {}",
            link.characteristics.len(),
            SERVICE_UUID
        );
        Ok(link)
    }

    async fn find_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<PlatformPeripheral, BleClientError> {
        let peripherals = self.adapter.peripherals().await?;

        for peripheral in peripherals {
            if let Some(seen) = describe_or_skip(&peripheral).await {
                if seen.is_same_peripheral(device) {
                    return Ok(peripheral);
                }
            }
        }

        Err(BleClientError::DeviceNotFound)
    }
}

#[async_trait::async_trait]
impl Radio for BleClient {
    type Link = BtleplugLink;

    async fn discover(
        &self,
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>, BleClientError> {
        BleScanner::with_adapter(self.adapter.clone())
            .discover(filter, timeout)
            .await
    }

    async fn connect(&self, device: &DiscoveredDevice) -> Result<Self::Link, BleClientError> {
        self.connect_device(device).await
    }
}

fn find_characteristics(
    peripheral: &PlatformPeripheral,
) -> Result<HashMap<Uuid, Characteristic>, BleClientError> {
    let service = peripheral
        .services()
        .into_iter()
        .find(|s| s.uuid == SERVICE_UUID)
        .ok_or(BleClientError::ServiceNotFound(SERVICE_UUID))?;

    let mut found = HashMap::new();
    for char in service.characteristics {
        if REQUIRED_CHARACTERISTICS.contains(&char.uuid) {
            found.insert(char.uuid, char);
        }
    }

    for uuid in REQUIRED_CHARACTERISTICS {
        if !found.contains_key(&uuid) {
            return Err(BleClientError::CharacteristicNotFound(uuid));
        }
    }
    Ok(found)
}

/// btleplug 连接会话
///
/// 正常路径由调用方 `disconnect()`；若持有它的 future 被取消，
/// `Drop` 会在当前 tokio 运行时上补发一次断开。
pub struct BtleplugLink {
    peripheral: PlatformPeripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    io_timeout: Option<Duration>,
    closed: AtomicBool,
    releases: TaskTracker,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, BleClientError> {
        self.characteristics
            .get(&uuid)
            .ok_or(BleClientError::CharacteristicNotFound(uuid))
    }
}

#[async_trait::async_trait]
impl GattLink for BtleplugLink {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleClientError> {
        let char = self.characteristic(characteristic)?;
        with_timeout(self.io_timeout, async {
            Ok(self.peripheral.read(char).await?)
        })
        .await
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), BleClientError> {
        let char = self.characteristic(characteristic)?;
        with_timeout(self.io_timeout, async {
            Ok(self
                .peripheral
                .write(char, data, WriteType::WithResponse)
                .await?)
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), BleClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::info!("Disconnecting from {}", self.peripheral.address());
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let peripheral = self.peripheral.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.releases.track_future(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        log::warn!("Deferred disconnect failed: {}", e);
                    }
                }));
            }
            Err(_) => log::warn!("Link dropped outside runtime, connection not released"),
        }
    }
}
