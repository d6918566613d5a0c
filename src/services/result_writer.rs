//! 结果保存服务 - 业务能力层
//!
//! 只负责"把最终结果落盘"，不关心流程

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::PersistenceError;
use crate::workflow::FinalResult;

/// 持久化边界
///
/// 编排器在到达终态后最多调用一次 `save`，运行中从不读取。
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, result: &FinalResult) -> Result<(), PersistenceError>;
}

/// 把结果写成 `<dir>/<session_id>.json`
pub struct JsonResultWriter {
    output_dir: PathBuf,
}

impl JsonResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, result: &FinalResult) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", result.session_id()))
    }
}

#[async_trait]
impl ResultSink for JsonResultWriter {
    async fn save(&self, result: &FinalResult) -> Result<(), PersistenceError> {
        let path = self.path_for(result);
        debug!(
            "写入结果: 会话 {} | 原因 {} | 字数 {}",
            result.session_id(),
            result.reason,
            result.word_count()
        );

        let body = serde_json::to_vec_pretty(result)?;

        let write_failed = |source| PersistenceError::WriteFailed {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(write_failed)?;
        tokio::fs::write(&path, body).await.map_err(write_failed)?;

        Ok(())
    }
}
