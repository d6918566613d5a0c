//! 工作流最终结果

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;

use crate::error::WorkflowError;
use crate::workflow::state::{EntryKind, SessionId, WorkflowState};
use crate::workflow::StageName;

/// 完成原因
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CompletionReason {
    /// Reflector 认可了草稿
    Satisfied,
    /// 修订预算用完仍未被认可（正常结束，不是故障）
    BudgetExhausted,
    /// 外部取消或会话超时
    Cancelled,
    /// 故障
    Failed {
        stage: Option<StageName>,
        error: WorkflowError,
    },
}

impl CompletionReason {
    pub fn is_failed(&self) -> bool {
        matches!(self, CompletionReason::Failed { .. })
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            CompletionReason::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionReason::Satisfied => write!(f, "satisfied"),
            CompletionReason::BudgetExhausted => write!(f, "budget-exhausted"),
            CompletionReason::Cancelled => write!(f, "cancelled"),
            CompletionReason::Failed { error, .. } => write!(f, "failed({})", error.class()),
        }
    }
}

/// 交给持久化 / UI 层的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub state: WorkflowState,
    pub reason: CompletionReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FinalResult {
    pub fn session_id(&self) -> SessionId {
        self.state.id()
    }

    /// 是否产出了可用的文章（认可或预算耗尽）
    pub fn has_document(&self) -> bool {
        matches!(
            self.reason,
            CompletionReason::Satisfied | CompletionReason::BudgetExhausted
        )
    }

    pub fn word_count(&self) -> usize {
        self.state.draft().split_whitespace().count()
    }

    /// 某阶段成功执行的次数
    pub fn invocations(&self, stage: StageName) -> usize {
        self.state
            .history()
            .iter()
            .filter(|h| h.stage == stage && h.kind == EntryKind::Completed)
            .count()
    }
}
