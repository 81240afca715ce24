//! 接收工作流
//!
//! 高层 API 封装一次完整的拉取流程:
//! 1. 扫描目标设备
//! 2. 建立 GATT 连接
//! 3. 读取文件名和文件大小
//! 4. 发送 START
//! 5. 分块读取文件数据
//! 6. 保存为 `received_<文件名>`
//!
//! 连接在第 2 步之后的任何退出路径上都会断开。

use log::{info, warn};

use crate::ble::{BleClientError, DeviceFilter, DiscoveredDevice, GattLink, Radio};
use crate::config::FetchSettings;
use crate::transfer::{
    ChunkReader, MetadataError, PersistError, Persister, TransferEnd, TransferMetadata,
    read_metadata, start_transfer,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// 拉取进度回调
pub trait FetchProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 找到目标设备
    fn on_device(&self, device: &DiscoveredDevice);
    /// 读到文件信息
    fn on_metadata(&self, metadata: &TransferMetadata);
    /// 进度更新
    fn on_progress(&self, received: u64, total: u64);
    /// 文件已保存
    fn on_complete(&self, report: &FetchReport);
    /// 本次拉取失败
    fn on_error(&self, error: &str);
}

/// 拉取选项
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub filter: DeviceFilter,
    pub scan_timeout: Duration,
    /// 标称块大小
    pub chunk_size: usize,
    /// START 确认后的额外等待
    pub settle_delay: Duration,
    pub output_dir: PathBuf,
    pub file_prefix: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for FetchOptions {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            filter: settings.device_filter(),
            scan_timeout: settings.scan_timeout(),
            chunk_size: settings.chunk_size,
            settle_delay: settings.settle_delay(),
            output_dir: settings.output_dir.clone(),
            file_prefix: settings.file_prefix.clone(),
        }
    }
}

/// 一次拉取的结果
#[derive(Debug)]
pub struct FetchReport {
    pub device: DiscoveredDevice,
    pub metadata: TransferMetadata,
    pub path: PathBuf,
    pub bytes_received: usize,
    pub iterations: usize,
    pub end: TransferEnd,
}

impl FetchReport {
    /// 是否收齐了外设声明的全部字节
    pub fn is_complete(&self) -> bool {
        self.bytes_received as u64 == self.metadata.file_size
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// 扫描结束仍未发现目标设备，没有尝试连接
    DeviceNotFound,
    Received(FetchReport),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Scan failed: {0}")]
    Scan(#[source] BleClientError),

    #[error("Device {0} not found during connection")]
    DeviceVanished(String),

    #[error("Connection error: {0}")]
    Connection(#[source] BleClientError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("Failed to send START: {0}")]
    Start(#[source] BleClientError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// 接收端工作流
pub struct Fetcher<R: Radio> {
    radio: R,
    options: FetchOptions,
    persister: Persister,
}

impl<R: Radio> Fetcher<R> {
    pub fn new(radio: R, options: FetchOptions) -> Self {
        let persister =
            Persister::new(options.output_dir.clone()).with_prefix(options.file_prefix.clone());
        Self {
            radio,
            options,
            persister,
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// 执行一次扫描-连接-拉取-保存
    pub async fn run_once<C: FetchProgressCallback + ?Sized>(
        &self,
        callback: &C,
    ) -> Result<FetchOutcome, FetchError> {
        callback.on_status("正在扫描设备...");

        let device = match self
            .radio
            .discover(&self.options.filter, self.options.scan_timeout)
            .await
        {
            Ok(Some(device)) => device,
            Ok(None) => {
                callback.on_status("未找到目标设备");
                return Ok(FetchOutcome::DeviceNotFound);
            }
            Err(e) => return Err(report_error(callback, FetchError::Scan(e))),
        };
        callback.on_device(&device);

        callback.on_status(&format!("正在连接 {}...", device.address));
        let link = match self.radio.connect(&device).await {
            Ok(link) => link,
            Err(BleClientError::DeviceNotFound) => {
                let err = FetchError::DeviceVanished(device.address.clone());
                return Err(report_error(callback, err));
            }
            Err(e) => return Err(report_error(callback, FetchError::Connection(e))),
        };
        callback.on_status("已连接");

        let result = self.transfer(&link, device, callback).await;

        if let Err(e) = link.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }

        match result {
            Ok(report) => {
                callback.on_complete(&report);
                Ok(FetchOutcome::Received(report))
            }
            Err(e) => Err(report_error(callback, e)),
        }
    }

    async fn transfer<C: FetchProgressCallback + ?Sized>(
        &self,
        link: &R::Link,
        device: DiscoveredDevice,
        callback: &C,
    ) -> Result<FetchReport, FetchError> {
        let metadata = read_metadata(link).await?;
        callback.on_metadata(&metadata);

        start_transfer(link, self.options.settle_delay)
            .await
            .map_err(FetchError::Start)?;

        let outcome = ChunkReader::new(self.options.chunk_size)
            .read_all(link, metadata.file_size, |received, total| {
                callback.on_progress(received, total);
            })
            .await;

        // 不完整的数据同样保存，结果中标明结束原因
        let path = self
            .persister
            .save(&metadata.file_name, &outcome.data)
            .await?;

        info!(
            "Transfer finished: {} of {} bytes in {} reads ({})",
            outcome.data.len(),
            metadata.file_size,
            outcome.iterations,
            outcome.end
        );

        Ok(FetchReport {
            device,
            bytes_received: outcome.data.len(),
            iterations: outcome.iterations,
            end: outcome.end,
            metadata,
            path,
        })
    }
}

fn report_error<C: FetchProgressCallback + ?Sized>(callback: &C, error: FetchError) -> FetchError {
    callback.on_error(&error.to_string());
    error
}

/// 简化的拉取回调实现
pub struct SimpleFetchCallback {
    tx: mpsc::Sender<FetchEvent>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    Status(String),
    Device(DiscoveredDevice),
    Metadata(TransferMetadata),
    Progress { received: u64, total: u64 },
    Complete { path: PathBuf, bytes: usize, complete: bool },
    Error(String),
}

impl SimpleFetchCallback {
    pub fn new() -> (Self, mpsc::Receiver<FetchEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

impl FetchProgressCallback for SimpleFetchCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(FetchEvent::Status(status.to_string()));
    }

    fn on_device(&self, device: &DiscoveredDevice) {
        let _ = self.tx.try_send(FetchEvent::Device(device.clone()));
    }

    fn on_metadata(&self, metadata: &TransferMetadata) {
        let _ = self.tx.try_send(FetchEvent::Metadata(metadata.clone()));
    }

    fn on_progress(&self, received: u64, total: u64) {
        let _ = self.tx.try_send(FetchEvent::Progress { received, total });
    }

    fn on_complete(&self, report: &FetchReport) {
        let _ = self.tx.try_send(FetchEvent::Complete {
            path: report.path.clone(),
            bytes: report.bytes_received,
            complete: report.is_complete(),
        });
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.try_send(FetchEvent::Error(error.to_string()));
    }
}
