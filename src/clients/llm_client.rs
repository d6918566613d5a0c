//! LLM 客户端 - 文本生成能力的具体实现
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（自定义 API 端点和模型）
//!
//! 指令文本作为 system 消息，结构化上下文格式化为 JSON 作为 user 消息。
//! 客户端本身不重试，只负责把错误归类为瞬时 / 配额 / 请求无效。

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CapabilityError;
use crate::services::TextGenerator;

/// OpenAI 兼容的文本生成客户端
///
/// 无会话状态，可以被所有会话共享。
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn build_messages(
        prompt: &str,
        context: &JsonValue,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let context_text =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());

        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt)
            .build()?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(context_text)
            .build()?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, context: &JsonValue) -> Result<String, CapabilityError> {
        debug!(
            "调用 LLM API，模型: {}, 指令长度: {} 字符",
            self.model_name,
            prompt.len()
        );

        let messages = Self::build_messages(prompt, context).map_err(classify_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(classify_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_error(e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        debug!("LLM API 调用成功，返回 {} 字符", content.len());
        Ok(content)
    }
}

fn classify_error(error: OpenAIError) -> CapabilityError {
    match error {
        OpenAIError::ApiError(api) => classify_api_error(
            api.code.as_ref().map(ToString::to_string).as_deref(),
            api.r#type.as_ref().map(ToString::to_string).as_deref(),
            &api.message,
        ),
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                CapabilityError::timeout(e.to_string())
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16(), e.to_string())
            } else {
                CapabilityError::network(e.to_string())
            }
        }
        OpenAIError::InvalidArgument(message) => CapabilityError::invalid_request(message),
        other => CapabilityError::network(other.to_string()),
    }
}

/// 按 API 返回的 code / type / message 归类
pub fn classify_api_error(code: Option<&str>, kind: Option<&str>, message: &str) -> CapabilityError {
    let code = code.unwrap_or_default().to_ascii_lowercase();
    let kind = kind.unwrap_or_default().to_ascii_lowercase();
    let lowered = message.to_ascii_lowercase();
    let has = |needle: &str| code.contains(needle) || kind.contains(needle);

    if has("insufficient_quota") || has("billing") || lowered.contains("exceeded your current quota") {
        return CapabilityError::quota(message);
    }
    if has("rate_limit") || lowered.contains("rate limit") || lowered.contains("too many requests") {
        return CapabilityError::rate_limited(message, None);
    }
    if has("timeout") || lowered.contains("timed out") {
        return CapabilityError::timeout(message);
    }
    if has("server_error") || has("overloaded") || has("service_unavailable") {
        return CapabilityError::network(message);
    }
    CapabilityError::invalid_request(message)
}

fn classify_status(status: u16, message: String) -> CapabilityError {
    match status {
        429 => CapabilityError::rate_limited(message, None),
        408 => CapabilityError::timeout(message),
        402 => CapabilityError::quota(message),
        500..=599 => CapabilityError::network(message),
        _ => CapabilityError::invalid_request(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_api_error_rate_limit() {
        let err = classify_api_error(Some("rate_limit_exceeded"), None, "Rate limit reached");
        assert!(matches!(
            err,
            CapabilityError::Transient {
                kind: crate::error::TransientKind::RateLimited,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_api_error_quota_is_fatal() {
        let err = classify_api_error(
            Some("insufficient_quota"),
            Some("insufficient_quota"),
            "You exceeded your current quota",
        );
        assert!(!err.is_transient());
        assert_eq!(err.class(), "quota");
    }

    #[test]
    fn test_classify_api_error_server_side() {
        let err = classify_api_error(None, Some("server_error"), "The server had an error");
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_api_error_defaults_to_invalid() {
        let err = classify_api_error(Some("model_not_found"), Some("invalid_request_error"), "no such model");
        assert!(!err.is_transient());
        assert_eq!(err.class(), "invalid_request");
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(503, "unavailable".into()).is_transient());
        assert!(classify_status(429, "slow down".into()).is_transient());
        assert!(!classify_status(401, "unauthorized".into()).is_transient());
    }
}
