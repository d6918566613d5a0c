//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责状态机推进、会话隔离和批量调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `engine` - 编排引擎（状态机）
//! - 按固定顺序推进五个阶段，决定回到 Researcher 还是结束
//! - [`WorkflowState`](crate::workflow::WorkflowState) 的唯一写者
//! - 在每个迁移边界检查取消，按需暂停
//!
//! ### `session_manager` - 会话管理器
//! - 一个会话 = 一个独立任务 + 私有状态
//! - 进度快照、结果查询、取消、暂停后的 resume / amend
//! - 控制并发数量（Semaphore）
//!
//! ### `batch_processor` - 批量主题处理器
//! - 管理应用生命周期（初始化、运行、统计）
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<topic>)
//!     ↓
//! session_manager (每个会话一个任务)
//!     ↓
//! engine::Orchestrator (处理单个 WorkflowState)
//!     ↓
//! workflow::stages (planner / researcher / drafter / reflector / critic)
//!     ↓
//! services (能力层：generation / search / retry / result_writer)
//! ```

pub mod batch_processor;
pub mod engine;
pub mod session_manager;

// 重新导出主要类型
pub use batch_processor::{App, ProcessingStats};
pub use engine::{
    Amendment, ControlCommand, ControlReply, Orchestrator, RunControl, RunSnapshot,
};
pub use session_manager::{
    CancelAck, ProgressSnapshot, SessionManager, SessionResult, SessionSummary,
};
