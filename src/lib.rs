//! # Essay Workflow
//!
//! 多阶段长文生成的工作流编排引擎
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 能力层（Services）
//! - `services/` - 描述"我能做什么"，不持有任何会话状态
//! - `TextGenerator` / `WebSearch` - 文本生成与网页检索能力接口
//! - `call_with_retry` - 统一的超时 / 重试 / 错误分类
//! - `ResultSink` - 最终结果的持久化边界
//!
//! ### ② 客户端（Clients）
//! - `clients/` - 能力接口的具体实现
//! - `LlmClient` - OpenAI 兼容接口
//! - `SearchClient` - Tavily 兼容接口
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一篇文章"的状态和五个阶段
//! - `WorkflowState` - 状态与不变量
//! - `stages` - Planner → Researcher → Drafter → Reflector → Critic
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/engine` - 状态机，唯一的状态写者
//! - `orchestrator/session_manager` - 会话隔离、进度、取消
//! - `orchestrator/batch_processor` - 批量主题处理器
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{
    AppError, AppResult, CapabilityError, ControlError, SessionError, WorkflowError,
};
pub use orchestrator::{
    Amendment, App, CancelAck, Orchestrator, ProgressSnapshot, SessionManager, SessionResult,
};
pub use services::{JsonResultWriter, ResultSink, RetryPolicy, SearchHit, TextGenerator, WebSearch};
pub use workflow::{
    CompletionReason, FinalResult, SessionId, StageDeps, StageName, Status, WorkflowRequest,
    WorkflowState,
};
