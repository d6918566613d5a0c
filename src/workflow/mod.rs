//! 流程层（Workflow）
//!
//! 定义"一篇文章"从大纲到定稿所需的状态与五个阶段：
//! Planner → Researcher → Drafter → Reflector → (Critic → Researcher ...)
//!
//! 阶段函数只读取 [`WorkflowState`]，返回各自的产出；
//! 写入状态是编排器的职责。

pub mod result;
pub mod stages;
pub mod state;
pub mod verdict;

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

pub use result::{CompletionReason, FinalResult};
pub use stages::{StageDeps, StageSettings};
pub use state::{
    EntryKind, HistoryEntry, ResearchNote, Section, SessionId, Status, WorkflowRequest,
    WorkflowState,
};
pub use verdict::{MarkerVerdictParser, Verdict, VerdictParser};

/// 阶段名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Planner,
    Researcher,
    Drafter,
    Reflector,
    Critic,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::Planner,
        StageName::Researcher,
        StageName::Drafter,
        StageName::Reflector,
        StageName::Critic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Planner => "planner",
            StageName::Researcher => "researcher",
            StageName::Drafter => "drafter",
            StageName::Reflector => "reflector",
            StageName::Critic => "critic",
        }
    }
}

impl Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}
