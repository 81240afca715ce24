//! 工作流模块
//!
//! 提供高层 API 封装完整的拉取流程和持续监听

pub mod fetch;
pub mod monitor;

pub use fetch::{
    FetchError, FetchEvent, FetchOptions, FetchOutcome, FetchProgressCallback, FetchReport,
    Fetcher, SimpleFetchCallback,
};
pub use monitor::{Monitor, MonitorOptions, MonitorSummary};
