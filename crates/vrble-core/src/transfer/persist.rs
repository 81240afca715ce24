//! 接收文件落盘
//!
//! 目标路径为 `output_dir/<prefix><file_name>`，文件名来自外设，
//! 含路径分隔符或 `..` 的名称一律拒绝。
//!
//! 先写入同目录下的 `.vrble-<uuid>.part`，同步后再重命名，
//! 失败时删除临时文件，不会留下截断的目标文件。

use log::{debug, error, info};

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_FILE_PREFIX: &str = "received_";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Unsafe file name reported by peer: {0:?}")]
    UnsafeFileName(String),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 校验外设报告的文件名，只允许单个普通路径分量
pub fn validate_file_name(name: &str) -> Result<&str, PersistError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();

    if unsafe_name {
        return Err(PersistError::UnsafeFileName(name.to_string()));
    }
    Ok(name)
}

#[derive(Debug, Clone)]
pub struct Persister {
    output_dir: PathBuf,
    prefix: String,
}

impl Default for Persister {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Persister {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 计算保存路径，不做任何 I/O
    pub fn target_path(&self, file_name: &str) -> Result<PathBuf, PersistError> {
        let name = validate_file_name(file_name)?;
        Ok(self.output_dir.join(format!("{}{}", self.prefix, name)))
    }

    pub async fn save(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, PersistError> {
        let target = match self.target_path(file_name) {
            Ok(path) => path,
            Err(e) => {
                error!("Error saving file: {}", e);
                return Err(e);
            }
        };

        // 临时名长度固定，目标名本身合法时不会因临时名超长而失败
        let temp = self
            .output_dir
            .join(format!(".vrble-{}.part", uuid::Uuid::new_v4()));

        if let Err(source) = write_then_rename(&temp, &target, data).await {
            error!("Error saving file {:?}: {}", target, source);
            if fs::remove_file(&temp).await.is_ok() {
                debug!("Removed partial file {:?}", temp);
            }
            return Err(PersistError::Io {
                path: target,
                source,
            });
        }

        info!("File saved: {:?} ({} bytes)", target, data.len());
        Ok(target)
    }
}

async fn write_then_rename(temp: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(temp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp, target).await
}
