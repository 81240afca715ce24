//! GATT 抽象层
//!
//! 传输流程只依赖这里的两个 trait，真实实现基于 btleplug
//! (见 [`crate::ble::client`])，测试中可替换为内存模拟外设。

use crate::ble::client::BleClientError;
use crate::ble::scanner::{DeviceFilter, DiscoveredDevice};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 控制特征支持的命令
///
/// 外设收到后：
/// - `START`: 将读取偏移归零，开始传输
/// - `RESET`: 归零偏移并卸载当前文件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Reset,
}

impl ControlCommand {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ControlCommand::Start => b"START",
            ControlCommand::Reset => b"RESET",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::Start => write!(f, "START"),
            ControlCommand::Reset => write!(f, "RESET"),
        }
    }
}

/// 已建立的 GATT 连接
///
/// 由单个任务独占，不需要加锁。
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    /// 读取一次特征值
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleClientError>;

    /// 带响应写入特征值，返回即表示外设已确认
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), BleClientError>;

    /// 断开连接，重复调用无副作用
    async fn disconnect(&self) -> Result<(), BleClientError>;
}

#[async_trait::async_trait]
impl<T: GattLink + ?Sized> GattLink for Arc<T> {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, BleClientError> {
        (**self).read(characteristic).await
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), BleClientError> {
        (**self).write(characteristic, data).await
    }

    async fn disconnect(&self) -> Result<(), BleClientError> {
        (**self).disconnect().await
    }
}

/// 无线电栈：发现设备并建立连接
#[async_trait::async_trait]
pub trait Radio: Send + Sync {
    type Link: GattLink;

    /// 在 `timeout` 内扫描，返回第一个匹配的设备；未找到返回 `None`
    async fn discover(
        &self,
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>, BleClientError>;

    /// 连接到已发现的设备
    async fn connect(&self, device: &DiscoveredDevice) -> Result<Self::Link, BleClientError>;
}

/// 为单次 GATT 操作加上可选的超时
pub async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, BleClientError>
where
    F: Future<Output = Result<T, BleClientError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BleClientError::Timeout(limit))?,
        None => fut.await,
    }
}
