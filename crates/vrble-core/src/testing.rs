//! 单元测试用的内存模拟外设

use crate::ble::{
    BleClientError, DeviceFilter, DiscoveredDevice, FILE_DATA_CHAR_UUID, FILE_NAME_CHAR_UUID,
    FILE_SIZE_CHAR_UUID, GattLink, Radio,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

type Scripted = Result<Vec<u8>, String>;

/// 按脚本返回读结果并记录写入的 [`GattLink`]
#[derive(Default)]
pub struct ScriptedLink {
    reads: Mutex<HashMap<Uuid, VecDeque<Scripted>>>,
    read_counts: Mutex<HashMap<Uuid, usize>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    write_error: Mutex<Option<String>>,
    disconnects: AtomicUsize,
}

impl ScriptedLink {
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let link = Self::default();
        for chunk in chunks {
            link.push_read(FILE_DATA_CHAR_UUID, chunk);
        }
        link
    }

    pub fn push_read(&self, uuid: Uuid, data: impl Into<Vec<u8>>) {
        self.reads
            .lock()
            .unwrap()
            .entry(uuid)
            .or_default()
            .push_back(Ok(data.into()));
    }

    pub fn push_read_error(&self, uuid: Uuid, message: &str) {
        self.reads
            .lock()
            .unwrap()
            .entry(uuid)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn fail_writes(&self, message: &str) {
        *self.write_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn reads_of(&self, uuid: Uuid) -> usize {
        self.read_counts
            .lock()
            .unwrap()
            .get(&uuid)
            .copied()
            .unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GattLink for ScriptedLink {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleClientError> {
        *self
            .read_counts
            .lock()
            .unwrap()
            .entry(characteristic)
            .or_default() += 1;

        let next = self
            .reads
            .lock()
            .unwrap()
            .get_mut(&characteristic)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(data)) => Ok(data),
            Some(Err(message)) => Err(BleClientError::ConnectionFailed(message)),
            None => Err(BleClientError::ConnectionFailed(format!(
                "no scripted read for {characteristic}"
            ))),
        }
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), BleClientError> {
        if let Some(message) = self.write_error.lock().unwrap().clone() {
            return Err(BleClientError::ConnectionFailed(message));
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BleClientError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn quest_device() -> DiscoveredDevice {
    DiscoveredDevice {
        name: Some("Quest 3".to_string()),
        address: "AA:BB:CC:DD:EE:FF".to_string(),
        id: "hci0/dev_AA_BB_CC_DD_EE_FF".to_string(),
        rssi: Some(-48),
    }
}

/// 一次完整传输的脚本：文件名、大小和若干数据块
pub fn transfer_link(name: &str, size: &str, chunks: Vec<Vec<u8>>) -> Arc<ScriptedLink> {
    let link = ScriptedLink::with_chunks(chunks);
    link.push_read(FILE_NAME_CHAR_UUID, name);
    link.push_read(FILE_SIZE_CHAR_UUID, size);
    Arc::new(link)
}

/// 按顺序交出预先准备的连接
#[derive(Default)]
pub struct ScriptedRadio {
    pub device: Option<DiscoveredDevice>,
    links: Mutex<VecDeque<Arc<ScriptedLink>>>,
    discover_calls: AtomicUsize,
    connect_calls: AtomicUsize,
}

impl ScriptedRadio {
    pub fn new(device: Option<DiscoveredDevice>) -> Self {
        Self {
            device,
            ..Default::default()
        }
    }

    pub fn push_link(&self, link: Arc<ScriptedLink>) {
        self.links.lock().unwrap().push_back(link);
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Radio for ScriptedRadio {
    type Link = Arc<ScriptedLink>;

    async fn discover(
        &self,
        filter: &DeviceFilter,
        _timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>, BleClientError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.clone().filter(|d| filter.matches(d)))
    }

    async fn connect(&self, _device: &DiscoveredDevice) -> Result<Self::Link, BleClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(BleClientError::DeviceNotFound)
    }
}
