//! 文本生成能力

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::CapabilityError;

/// 文本生成能力
///
/// - `prompt`: 指令（角色、输出格式要求）
/// - `context`: 结构化上下文（主题、大纲、证据、草稿等）
///
/// 实现方负责自己的限流；限流信号必须以 `CapabilityError::Transient`
/// 返回，由调用方统一重试。
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &JsonValue) -> Result<String, CapabilityError>;
}
