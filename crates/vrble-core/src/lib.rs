//! vrble Core Library
//!
//! 从 Quest 3 上运行的 BLE GATT Server 拉取单个文件
//!
//! # 模块
//!
//! - **ble**: BLE 扫描、连接和 GATT 读写
//! - **transfer**: 元数据读取、START 命令、分块读取、落盘
//! - **workflow**: 单次拉取流程和持续监听
//! - **config**: 设置的加载与保存
//!
//! # 使用示例
//!
//! ```ignore
//! use vrble_core::{BleClient, FetchOptions, FetchOutcome, Fetcher, FetchSettings};
//!
//! let settings = FetchSettings::load();
//! let radio = BleClient::new().await?.with_io_timeout(settings.io_timeout());
//! let fetcher = Fetcher::new(radio, FetchOptions::from(&settings));
//!
//! match fetcher.run_once(&callback).await? {
//!     FetchOutcome::Received(report) => println!("saved {:?}", report.path),
//!     FetchOutcome::DeviceNotFound => println!("device not found"),
//! }
//! ```

pub mod ble;
pub mod config;
pub mod transfer;
pub mod workflow;

#[cfg(test)]
mod testing;

// BLE re-exports
pub use ble::{
    BleClient, BleClientError, BleScanner, BtleplugLink, CONTROL_CHAR_UUID, ControlCommand,
    DeviceFilter, DiscoveredDevice, FILE_DATA_CHAR_UUID, FILE_NAME_CHAR_UUID, FILE_SIZE_CHAR_UUID,
    GattLink, Radio, SERVICE_UUID,
};

// Config re-exports
pub use config::FetchSettings;

// Transfer re-exports
pub use transfer::{
    ChunkReadOutcome, ChunkReader, MetadataError, PersistError, Persister, TransferEnd,
    TransferMetadata,
};

// Workflow re-exports
pub use workflow::{
    FetchError, FetchEvent, FetchOptions, FetchOutcome, FetchProgressCallback, FetchReport,
    Fetcher, Monitor, MonitorOptions, MonitorSummary, SimpleFetchCallback,
};
