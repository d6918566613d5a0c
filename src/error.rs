use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::workflow::state::{SessionId, Status};

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 能力接口错误
    #[error("能力接口错误: {0}")]
    Capability(#[from] CapabilityError),
    /// 流程错误
    #[error("流程错误: {0}")]
    Workflow(#[from] WorkflowError),
    /// 会话管理错误
    #[error("会话错误: {0}")]
    Session(#[from] SessionError),
    /// 结果持久化错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
}

/// 瞬时错误的细分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// 单次调用超时
    Timeout,
    /// 请求频率限制
    RateLimited,
    /// 网络抖动 / 服务端 5xx
    Network,
}

impl TransientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::RateLimited => "rate_limited",
            TransientKind::Network => "network",
        }
    }
}

/// 能力接口（生成 / 搜索）错误
///
/// 只有 `Transient` 会被重试，其余类型重试也无济于事。
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum CapabilityError {
    /// 超时、限流、网络抖动
    #[error("瞬时错误 ({}): {message}", .kind.as_str())]
    Transient {
        kind: TransientKind,
        message: String,
        /// 服务端建议的等待秒数
        retry_after_secs: Option<u64>,
    },
    /// 配额耗尽
    #[error("配额耗尽: {message}")]
    Quota { message: String },
    /// 凭证无效或请求格式永久错误
    #[error("无效请求: {message}")]
    InvalidRequest { message: String },
}

impl CapabilityError {
    pub fn timeout(message: impl Into<String>) -> Self {
        CapabilityError::Transient {
            kind: TransientKind::Timeout,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        CapabilityError::Transient {
            kind: TransientKind::RateLimited,
            message: message.into(),
            retry_after_secs,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        CapabilityError::Transient {
            kind: TransientKind::Network,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        CapabilityError::Quota {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        CapabilityError::InvalidRequest {
            message: message.into(),
        }
    }

    /// 是否属于可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient { .. })
    }

    /// 服务端给出的等待提示
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CapabilityError::Transient {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            CapabilityError::Transient { .. } => "transient",
            CapabilityError::Quota { .. } => "quota",
            CapabilityError::InvalidRequest { .. } => "invalid_request",
        }
    }
}

/// 流程错误：导致工作流进入 FAILED 的所有原因
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum WorkflowError {
    /// 阶段输出不合法（例如空大纲、空草稿），不重试
    #[error("校验失败: {message}")]
    Validation { message: String },
    /// 瞬时错误重试耗尽
    #[error("{operation} 重试 {attempts} 次后仍失败: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: CapabilityError,
    },
    /// 不可重试的能力接口错误（配额 / 无效请求）
    #[error("{operation} 调用失败: {source}")]
    Capability {
        operation: String,
        source: CapabilityError,
    },
    /// 状态机拒绝的迁移
    #[error("非法状态迁移: {from} -> {to}")]
    IllegalTransition { from: Status, to: Status },
    /// 暂停期间的人工修改被拒绝
    #[error("修改被拒绝: {message}")]
    Amendment { message: String },
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            message: message.into(),
        }
    }

    pub fn amendment(message: impl Into<String>) -> Self {
        WorkflowError::Amendment {
            message: message.into(),
        }
    }

    /// 稳定的错误分类，写入 history 与完成原因
    pub fn class(&self) -> &'static str {
        match self {
            WorkflowError::Validation { .. } => "validation",
            WorkflowError::RetriesExhausted { .. } => "transient_exhausted",
            WorkflowError::Capability { source, .. } => source.class(),
            WorkflowError::IllegalTransition { .. } => "illegal_transition",
            WorkflowError::Amendment { .. } => "amendment",
        }
    }
}

/// 会话管理错误
#[derive(Debug, Error)]
pub enum SessionError {
    /// 会话不存在
    #[error("会话不存在: {0}")]
    NotFound(SessionId),
    /// 请求参数不合法
    #[error("会话请求不合法: {0}")]
    InvalidRequest(WorkflowError),
    /// 会话未处于暂停状态
    #[error("会话 {0} 未暂停")]
    NotPaused(SessionId),
    /// 会话已结束
    #[error("会话 {0} 已结束")]
    Finished(SessionId),
    /// 编排任务意外退出
    #[error("会话 {0} 的编排任务已退出")]
    TaskGone(SessionId),
    /// 修改被编排器拒绝
    #[error("会话 {session} 的修改被拒绝: {source}")]
    AmendmentRejected {
        session: SessionId,
        source: WorkflowError,
    },
}

/// 暂停控制指令被编排器拒绝
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    /// 指令针对的那次暂停已经结束
    #[error("暂停 #{0} 已结束")]
    StalePause(u64),
    /// 运行已到终态
    #[error("运行已结束")]
    Finished,
    /// 修改不合法
    #[error(transparent)]
    Amendment(WorkflowError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    InvalidValue { field: String, reason: String },
    /// 未知的阶段名
    #[error("未知的阶段名: {0}")]
    UnknownStage(String),
}

/// 结果持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        source: std::io::Error,
    },
    /// 序列化失败
    #[error("结果序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CapabilityError::timeout("slow").is_transient());
        assert!(CapabilityError::rate_limited("429", Some(3)).is_transient());
        assert!(CapabilityError::network("reset").is_transient());
        assert!(!CapabilityError::quota("used up").is_transient());
        assert!(!CapabilityError::invalid_request("bad key").is_transient());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = CapabilityError::rate_limited("429", Some(7));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(CapabilityError::network("reset").retry_after(), None);
    }

    #[test]
    fn test_workflow_error_class() {
        assert_eq!(WorkflowError::validation("empty plan").class(), "validation");
        let exhausted = WorkflowError::RetriesExhausted {
            operation: "search".to_string(),
            attempts: 4,
            last: CapabilityError::timeout("slow"),
        };
        assert_eq!(exhausted.class(), "transient_exhausted");
        let quota = WorkflowError::Capability {
            operation: "generate".to_string(),
            source: CapabilityError::quota("monthly limit"),
        };
        assert_eq!(quota.class(), "quota");
    }

    #[test]
    fn test_error_serializes_with_class_tag() {
        let err = WorkflowError::validation("empty plan");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["class"], "validation");
        assert_eq!(json["message"], "empty plan");
    }
}
