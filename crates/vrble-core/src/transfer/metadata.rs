//! 文件元数据读取
//!
//! 依次读取文件名和文件大小两个特征，两者都是 UTF-8 文本，
//! 大小为十进制整数。

use log::{error, info};

use crate::ble::{BleClientError, FILE_NAME_CHAR_UUID, FILE_SIZE_CHAR_UUID, GattLink};

/// 外设报告的文件信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Failed to read {field}: {source}")]
    Transport {
        field: &'static str,
        #[source]
        source: BleClientError,
    },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("Invalid file size: {0:?}")]
    InvalidSize(String),
}

pub fn parse_file_name(data: &[u8]) -> Result<String, MetadataError> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|_| MetadataError::InvalidUtf8 { field: "file name" })
}

/// 解析十进制文件大小，允许首尾空白
pub fn parse_file_size(data: &[u8]) -> Result<u64, MetadataError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| MetadataError::InvalidUtf8 { field: "file size" })?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| MetadataError::InvalidSize(text.to_string()))
}

/// 读取文件名和文件大小
///
/// 空文件名和 0 字节大小都按原样返回，不做额外校验。
pub async fn read_metadata<L: GattLink + ?Sized>(
    link: &L,
) -> Result<TransferMetadata, MetadataError> {
    let result = async {
        let name_data = link
            .read(FILE_NAME_CHAR_UUID)
            .await
            .map_err(|source| MetadataError::Transport {
                field: "file name",
                source,
            })?;
        let file_name = parse_file_name(&name_data)?;
        info!("File name: {}", file_name);

        let size_data = link
            .read(FILE_SIZE_CHAR_UUID)
            .await
            .map_err(|source| MetadataError::Transport {
                field: "file size",
                source,
            })?;
        let file_size = parse_file_size(&size_data)?;
        info!("File size: {} bytes", file_size);

        Ok(TransferMetadata {
            file_name,
            file_size,
        })
    }
    .await;

    if let Err(e) = &result {
        error!("Error reading file info: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_size() {
        assert_eq!(parse_file_size(b"1024").unwrap(), 1024);
        assert_eq!(parse_file_size(b" 45\n").unwrap(), 45);
        assert_eq!(parse_file_size(b"0").unwrap(), 0);
    }

    #[test]
    fn test_parse_file_size_rejects_garbage() {
        assert!(matches!(
            parse_file_size(b"-1"),
            Err(MetadataError::InvalidSize(s)) if s == "-1"
        ));
        assert!(matches!(
            parse_file_size(b""),
            Err(MetadataError::InvalidSize(_))
        ));
        assert!(matches!(
            parse_file_size(&[0xff, 0xfe]),
            Err(MetadataError::InvalidUtf8 { field: "file size" })
        ));
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("日志.txt".as_bytes()).unwrap(), "日志.txt");
        // 空名称原样接受
        assert_eq!(parse_file_name(b"").unwrap(), "");
        assert!(matches!(
            parse_file_name(&[0xc3, 0x28]),
            Err(MetadataError::InvalidUtf8 { field: "file name" })
        ));
    }
}
