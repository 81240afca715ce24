//! 文件传输模块
//!
//! 包含:
//! - 元数据读取 (文件名、文件大小)
//! - 控制命令 (START / RESET)
//! - 分块读取
//! - 落盘

pub mod chunk_reader;
pub mod control;
pub mod metadata;
pub mod persist;

pub use chunk_reader::{ChunkReadOutcome, ChunkReader, TransferEnd};
pub use control::{send_command, start_transfer};
pub use metadata::{MetadataError, TransferMetadata, read_metadata};
pub use persist::{DEFAULT_FILE_PREFIX, PersistError, Persister};

/// 进度百分比，声明大小为 0 时视为 100%
#[allow(clippy::cast_precision_loss)]
pub fn progress_percent(received: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    received as f64 / total as f64 * 100.0
}
