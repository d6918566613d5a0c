//! 程序配置
//!
//! 加载顺序：默认值 → TOML 文件（可选）→ 环境变量覆盖 → 校验。

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::workflow::StageName;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时运行的会话数量
    pub max_concurrent_sessions: usize,
    /// 请求未指定时的修订次数上限
    pub default_max_revisions: u32,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 结果 JSON 的输出目录
    pub output_dir: PathBuf,
    /// 命令行未给出主题时运行的主题
    pub topics: Vec<String>,
    /// 在这些阶段之后暂停
    pub interrupt_after: Vec<StageName>,
    /// 会话整体时限（秒），超时等同于取消
    pub session_timeout_secs: Option<u64>,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    // --- 检索配置 ---
    pub search_api_key: String,
    pub search_api_base_url: String,
    /// 每个检索词保留的结果数
    pub search_max_results: usize,
    pub max_initial_queries: usize,
    pub max_revision_queries: usize,
    pub parallel_queries: bool,
    // --- 重试配置 ---
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// 单次能力调用超时（秒），0 表示不限
    pub call_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 4,
            default_max_revisions: 2,
            verbose_logging: false,
            output_dir: PathBuf::from("output"),
            topics: Vec::new(),
            interrupt_after: Vec::new(),
            session_timeout_secs: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.0,
            llm_max_tokens: 4096,
            search_api_key: String::new(),
            search_api_base_url: "https://api.tavily.com".to_string(),
            search_max_results: 2,
            max_initial_queries: 3,
            max_revision_queries: 2,
            parallel_queries: false,
            retry_max_attempts: 4,
            retry_initial_backoff_ms: 500,
            retry_max_backoff_ms: 8000,
            call_timeout_secs: 60,
        }
    }
}

impl Config {
    /// 读取 TOML 文件（若给出），再应用环境变量覆盖并校验
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// 用环境变量覆盖；`lookup` 便于测试时注入
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        env.parse("MAX_CONCURRENT_SESSIONS", "usize", &mut self.max_concurrent_sessions)?;
        env.parse("DEFAULT_MAX_REVISIONS", "u32", &mut self.default_max_revisions)?;
        env.parse("VERBOSE_LOGGING", "bool", &mut self.verbose_logging)?;
        env.string("OUTPUT_DIR", |v| self.output_dir = PathBuf::from(v));
        env.string("LLM_API_KEY", |v| self.llm_api_key = v);
        env.string("LLM_API_BASE_URL", |v| self.llm_api_base_url = v);
        env.string("LLM_MODEL_NAME", |v| self.llm_model_name = v);
        env.parse("LLM_TEMPERATURE", "f32", &mut self.llm_temperature)?;
        env.parse("LLM_MAX_TOKENS", "u32", &mut self.llm_max_tokens)?;
        env.string("TAVILY_API_KEY", |v| self.search_api_key = v);
        env.string("SEARCH_API_BASE_URL", |v| self.search_api_base_url = v);
        env.parse("SEARCH_MAX_RESULTS", "usize", &mut self.search_max_results)?;
        env.parse("MAX_INITIAL_QUERIES", "usize", &mut self.max_initial_queries)?;
        env.parse("MAX_REVISION_QUERIES", "usize", &mut self.max_revision_queries)?;
        env.parse("PARALLEL_QUERIES", "bool", &mut self.parallel_queries)?;
        env.parse("RETRY_MAX_ATTEMPTS", "u32", &mut self.retry_max_attempts)?;
        env.parse("RETRY_INITIAL_BACKOFF_MS", "u64", &mut self.retry_initial_backoff_ms)?;
        env.parse("RETRY_MAX_BACKOFF_MS", "u64", &mut self.retry_max_backoff_ms)?;
        env.parse("CALL_TIMEOUT_SECS", "u64", &mut self.call_timeout_secs)?;

        if let Some(raw) = env.get("SESSION_TIMEOUT_SECS") {
            let secs = parse_value::<u64>("SESSION_TIMEOUT_SECS", "u64", &raw)?;
            self.session_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(raw) = env.get("INTERRUPT_AFTER") {
            self.interrupt_after = parse_stage_list(&raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sessions == 0 {
            return Err(invalid("max_concurrent_sessions", "必须大于 0"));
        }
        if self.default_max_revisions == 0 {
            return Err(invalid("default_max_revisions", "必须大于 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("retry_max_attempts", "必须大于 0"));
        }
        if self.retry_initial_backoff_ms > self.retry_max_backoff_ms {
            return Err(invalid(
                "retry_initial_backoff_ms",
                "不能大于 retry_max_backoff_ms",
            ));
        }
        if self.search_max_results == 0 {
            return Err(invalid("search_max_results", "必须大于 0"));
        }
        if self.max_initial_queries == 0 {
            return Err(invalid("max_initial_queries", "必须大于 0"));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(invalid("llm_temperature", "必须在 0.0 到 2.0 之间"));
        }
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str, mut apply: impl FnMut(String)) {
        if let Some(value) = self.get(name) {
            apply(value);
        }
    }

    fn parse<T: FromStr>(
        &self,
        name: &str,
        expected_type: &str,
        target: &mut T,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = self.get(name) {
            *target = parse_value(name, expected_type, &raw)?;
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, expected_type: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: name.to_string(),
            value: raw.to_string(),
            expected_type: expected_type.to_string(),
        })
}

/// 逗号分隔的阶段名，大小写不敏感
pub fn parse_stage_list(raw: &str) -> Result<Vec<StageName>, ConfigError> {
    let mut stages = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let stage: StageName = part.parse()?;
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    Ok(stages)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
