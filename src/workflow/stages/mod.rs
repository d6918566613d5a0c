//! 五个阶段函数
//!
//! 每个阶段：读取当前状态 → 调用能力接口（经统一重试）→ 返回产出。
//! 阶段本身不写状态，也不包含任何重试逻辑。

pub mod critic;
pub mod drafter;
pub mod planner;
pub mod prompts;
pub mod reflector;
pub mod researcher;

use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

use crate::config::Config;
use crate::error::WorkflowError;
use crate::services::{call_with_retry, RetryPolicy, TextGenerator, WebSearch};
use crate::workflow::verdict::{MarkerVerdictParser, VerdictParser};
use crate::workflow::StageName;

pub use researcher::ResearchOutput;

/// 阶段的可调参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    /// 首轮最多生成的检索词数
    pub max_initial_queries: usize,
    /// 修订轮最多生成的检索词数
    pub max_revision_queries: usize,
    /// 每个检索词保留的结果数
    pub results_per_query: usize,
    /// 同一轮内的检索词是否并发执行（结果仍按检索词顺序追加）
    pub parallel_queries: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            max_initial_queries: 3,
            max_revision_queries: 2,
            results_per_query: 2,
            parallel_queries: false,
        }
    }
}

impl StageSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_initial_queries: config.max_initial_queries,
            max_revision_queries: config.max_revision_queries,
            results_per_query: config.search_max_results,
            parallel_queries: config.parallel_queries,
        }
    }
}

/// 阶段依赖：共享、无会话状态的能力接口 + 策略
#[derive(Clone)]
pub struct StageDeps {
    pub generator: Arc<dyn TextGenerator>,
    pub search: Arc<dyn WebSearch>,
    pub retry: RetryPolicy,
    pub settings: StageSettings,
    pub verdicts: Arc<dyn VerdictParser>,
}

impl StageDeps {
    pub fn new(generator: Arc<dyn TextGenerator>, search: Arc<dyn WebSearch>) -> Self {
        Self {
            generator,
            search,
            retry: RetryPolicy::default(),
            settings: StageSettings::default(),
            verdicts: Arc::new(MarkerVerdictParser),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: StageSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_verdict_parser(mut self, verdicts: Arc<dyn VerdictParser>) -> Self {
        self.verdicts = verdicts;
        self
    }

    /// 经统一重试调用生成能力，返回去掉首尾空白的文本
    pub(crate) async fn generate(
        &self,
        stage: StageName,
        prompt: &str,
        mut context: JsonValue,
    ) -> Result<String, WorkflowError> {
        context["stage"] = json!(stage.as_str());
        let operation = format!("{}.generate", stage);
        let generator: &dyn TextGenerator = self.generator.as_ref();
        let context = &context;
        let text = call_with_retry(&self.retry, &operation, move || {
            generator.generate(prompt, context)
        })
        .await?;
        Ok(text.trim().to_string())
    }
}

/// 从生成文本中解析 JSON
///
/// 兼容 ```json 代码块包裹和前后多余说明文字。
pub(crate) fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// 去掉列表前缀（`-`、`*`、`1.`、`2)`）和引号
pub(crate) fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let line = if digits > 0 {
        let rest = &line[digits..];
        rest.strip_prefix('.')
            .or_else(|| rest.strip_prefix(')'))
            .map(str::trim_start)
            .unwrap_or(line)
    } else {
        line
    };
    line.trim_matches(|c| c == '"' || c == '\'').trim()
}
