//! 分块读取文件数据
//!
//! 外设每次读取数据特征返回下一块 (标称 20 字节)，没有序号和校验，
//! 顺序和完整性依赖 ATT 读语义。
//!
//! # 结束条件
//!
//! 每次读取后按以下顺序判断：
//! 1. 读取出错：立即停止，保留已收到的数据 ([`TransferEnd::Aborted`])
//! 2. 空块：停止 ([`TransferEnd::EmptyChunk`])，否则外设持续返回空数据会死循环
//! 3. 块长小于标称块大小：视为最后一块 ([`TransferEnd::ShortChunk`])
//! 4. 已收字节达到声明大小：完成 ([`TransferEnd::Complete`])
//!
//! 超出声明大小的字节会被截断，缓冲区不会超过声明大小。

use log::{debug, error, info, warn};

use crate::ble::{BleClientError, DEFAULT_CHUNK_SIZE, FILE_DATA_CHAR_UUID, GattLink};
use crate::transfer::progress_percent;

/// 读取循环结束的原因
#[derive(Debug)]
pub enum TransferEnd {
    /// 已收字节达到声明大小
    Complete,
    /// 收到短块，`remaining` 为仍未收到的声明字节数
    ShortChunk { remaining: u64 },
    /// 收到空块
    EmptyChunk { remaining: u64 },
    /// 传输错误
    Aborted(BleClientError),
}

impl TransferEnd {
    pub fn remaining(&self) -> Option<u64> {
        match self {
            TransferEnd::Complete => Some(0),
            TransferEnd::ShortChunk { remaining } | TransferEnd::EmptyChunk { remaining } => {
                Some(*remaining)
            }
            TransferEnd::Aborted(_) => None,
        }
    }
}

impl std::fmt::Display for TransferEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferEnd::Complete => write!(f, "complete"),
            TransferEnd::ShortChunk { remaining } => {
                write!(f, "short chunk ({remaining} bytes missing)")
            }
            TransferEnd::EmptyChunk { remaining } => {
                write!(f, "empty chunk ({remaining} bytes missing)")
            }
            TransferEnd::Aborted(e) => write!(f, "aborted: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct ChunkReadOutcome {
    pub data: Vec<u8>,
    pub declared_size: u64,
    /// 实际发出的读请求次数
    pub iterations: usize,
    pub end: TransferEnd,
}

impl ChunkReadOutcome {
    /// 是否收齐了声明的全部字节
    pub fn is_complete(&self) -> bool {
        self.data.len() as u64 == self.declared_size
    }
}

pub struct ChunkReader {
    chunk_size: usize,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkReader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 读取直到满足任一结束条件
    ///
    /// 每收到一块调用一次 `on_progress(已收字节, 声明大小)`。
    pub async fn read_all<L, F>(
        &self,
        link: &L,
        file_size: u64,
        mut on_progress: F,
    ) -> ChunkReadOutcome
    where
        L: GattLink + ?Sized,
        F: FnMut(u64, u64),
    {
        // 声明大小来自外设，预分配设上限
        let capacity = usize::try_from(file_size.min(1 << 20)).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        let mut bytes_read: u64 = 0;
        let mut iterations = 0;

        info!("Reading file data ({} bytes)...", file_size);

        let end = loop {
            if bytes_read >= file_size {
                break TransferEnd::Complete;
            }

            let chunk = match link.read(FILE_DATA_CHAR_UUID).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("Error reading chunk: {}", e);
                    break TransferEnd::Aborted(e);
                }
            };
            iterations += 1;

            let wanted = file_size - bytes_read;
            let take = chunk.len().min(usize::try_from(wanted).unwrap_or(usize::MAX));
            if take < chunk.len() {
                warn!(
                    "Peer sent {} bytes beyond declared size, truncating",
                    chunk.len() - take
                );
            }
            data.extend_from_slice(&chunk[..take]);
            bytes_read += take as u64;

            on_progress(bytes_read, file_size);
            debug!(
                "Progress: {:.1}% ({}/{} bytes)",
                progress_percent(bytes_read, file_size),
                bytes_read,
                file_size
            );

            let remaining = file_size - bytes_read;
            if chunk.is_empty() {
                warn!("Peer returned an empty chunk, {} bytes missing", remaining);
                break TransferEnd::EmptyChunk { remaining };
            }
            if chunk.len() < self.chunk_size {
                debug!("Last chunk received ({} bytes)", chunk.len());
                break TransferEnd::ShortChunk { remaining };
            }
        };

        if let Some(remaining) = end.remaining().filter(|r| *r > 0) {
            warn!(
                "Transfer ended early ({}), {} of {} bytes missing",
                end, remaining, file_size
            );
        }

        ChunkReadOutcome {
            data,
            declared_size: file_size,
            iterations,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLink;

    fn chunks(lens: &[usize]) -> Vec<Vec<u8>> {
        lens.iter()
            .enumerate()
            .map(|(i, &len)| vec![u8::try_from(i).unwrap(); len])
            .collect()
    }

    #[tokio::test]
    async fn test_zero_size_reads_nothing() {
        let link = ScriptedLink::with_chunks(chunks(&[20]));
        let outcome = ChunkReader::default().read_all(&link, 0, |_, _| {}).await;

        assert!(outcome.data.is_empty());
        assert_eq!(outcome.iterations, 0);
        assert!(matches!(outcome.end, TransferEnd::Complete));
        assert_eq!(link.reads_of(FILE_DATA_CHAR_UUID), 0);
    }

    #[tokio::test]
    async fn test_short_final_chunk_ends_transfer() {
        let link = ScriptedLink::with_chunks(chunks(&[20, 20, 5]));
        let mut progress = Vec::new();
        let outcome = ChunkReader::new(20)
            .read_all(&link, 45, |done, total| progress.push((done, total)))
            .await;

        assert_eq!(outcome.data.len(), 45);
        assert_eq!(outcome.iterations, 3);
        assert!(matches!(outcome.end, TransferEnd::ShortChunk { remaining: 0 }));
        assert!(outcome.is_complete());
        assert_eq!(progress, vec![(20, 45), (40, 45), (45, 45)]);
    }

    #[tokio::test]
    async fn test_exact_boundary_terminates_on_size() {
        let link = ScriptedLink::with_chunks(chunks(&[20, 20, 20, 20]));
        let outcome = ChunkReader::new(20).read_all(&link, 40, |_, _| {}).await;

        assert_eq!(outcome.data.len(), 40);
        assert_eq!(outcome.iterations, 2);
        assert!(matches!(outcome.end, TransferEnd::Complete));
        // 不会多读一次
        assert_eq!(link.reads_of(FILE_DATA_CHAR_UUID), 2);
    }

    #[tokio::test]
    async fn test_short_chunk_undercounts_declared_size() {
        let link = ScriptedLink::with_chunks(chunks(&[20, 7, 20]));
        let outcome = ChunkReader::new(20).read_all(&link, 100, |_, _| {}).await;

        assert_eq!(outcome.data.len(), 27);
        assert_eq!(outcome.iterations, 2);
        assert!(matches!(outcome.end, TransferEnd::ShortChunk { remaining: 73 }));
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_empty_chunk_stops_loop() {
        let link = ScriptedLink::with_chunks(chunks(&[20, 0, 0, 0]));
        // 块大小为 0 时短块规则永远不会触发
        let reader = ChunkReader::new(0);
        assert_eq!(reader.chunk_size(), 1);

        let outcome = reader.read_all(&link, 50, |_, _| {}).await;
        assert_eq!(outcome.iterations, 2);
        assert!(matches!(outcome.end, TransferEnd::EmptyChunk { remaining: 30 }));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_data() {
        let link = ScriptedLink::with_chunks(chunks(&[20]));
        link.push_read_error(FILE_DATA_CHAR_UUID, "link lost");

        let outcome = ChunkReader::new(20).read_all(&link, 60, |_, _| {}).await;

        assert_eq!(outcome.data.len(), 20);
        assert_eq!(outcome.iterations, 1);
        assert!(matches!(outcome.end, TransferEnd::Aborted(_)));
        assert_eq!(outcome.end.remaining(), None);
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_overrun_is_truncated() {
        let link = ScriptedLink::with_chunks(chunks(&[20, 20]));
        let outcome = ChunkReader::new(20).read_all(&link, 30, |_, _| {}).await;

        assert_eq!(outcome.data.len(), 30);
        assert!(outcome.is_complete());
        assert!(matches!(outcome.end, TransferEnd::Complete));
    }
}
