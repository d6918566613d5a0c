//! 工作流状态
//!
//! 一次文章生成请求的唯一真相来源。字段对外只读，所有修改方法都是
//! `pub(crate)`，只有编排器会调用它们（单写者）。

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflow::StageName;

/// 会话 / 工作流标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 日志用的短 ID（前 8 位）
    pub fn short(&self) -> String {
        self.0.simple().to_string().chars().take(8).collect()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 工作流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Init,
    Planning,
    Researching,
    Drafting,
    Reflecting,
    Critiquing,
    Complete,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed)
    }

    /// 状态机允许的迁移边
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (Complete, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Init, Planning)
            | (Planning, Researching)
            | (Researching, Drafting)
            | (Drafting, Reflecting)
            | (Reflecting, Complete)
            | (Reflecting, Critiquing)
            | (Critiquing, Researching) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Init => "INIT",
            Status::Planning => "PLANNING",
            Status::Researching => "RESEARCHING",
            Status::Drafting => "DRAFTING",
            Status::Reflecting => "REFLECTING",
            Status::Critiquing => "CRITIQUING",
            Status::Complete => "COMPLETE",
            Status::Failed => "FAILED",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 大纲中的一个章节
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// 该章节计划写什么
    #[serde(default)]
    pub summary: String,
}

impl Section {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
        }
    }
}

/// 一条检索证据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNote {
    pub query: String,
    pub source_url: String,
    pub excerpt: String,
}

/// history 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Completed,
    Failed,
    Amended,
}

/// 审计日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: StageName,
    /// 执行顺序序号，从 1 开始
    pub ordinal: u64,
    pub kind: EntryKind,
    pub input_summary: String,
    pub output_summary: String,
}

/// 一次生成请求的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: SessionId,
    pub topic: String,
    pub max_revisions: u32,
    /// 在这些阶段提交后暂停，等待 resume / amend
    #[serde(default)]
    pub interrupt_after: Vec<StageName>,
}

impl WorkflowRequest {
    pub fn new(topic: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            id: SessionId::new(),
            topic: topic.into(),
            max_revisions,
            interrupt_after: Vec::new(),
        }
    }

    pub fn with_interrupt_after(mut self, stages: impl IntoIterator<Item = StageName>) -> Self {
        self.interrupt_after = stages.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.topic.trim().is_empty() {
            return Err(WorkflowError::validation("topic 不能为空"));
        }
        if self.max_revisions == 0 {
            return Err(WorkflowError::validation("max_revisions 必须是正整数"));
        }
        Ok(())
    }
}

/// 贯穿所有阶段的工作流状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    id: SessionId,
    topic: String,
    plan: Vec<Section>,
    research_notes: Vec<ResearchNote>,
    /// 已发出的全部检索词
    queries: Vec<String>,
    draft: String,
    critique: Option<String>,
    revision_count: u32,
    max_revisions: u32,
    status: Status,
    history: Vec<HistoryEntry>,
}

impl WorkflowState {
    pub fn new(request: &WorkflowRequest) -> Self {
        Self {
            id: request.id,
            topic: request.topic.trim().to_string(),
            plan: Vec::new(),
            research_notes: Vec::new(),
            queries: Vec::new(),
            draft: String::new(),
            critique: None,
            revision_count: 0,
            max_revisions: request.max_revisions,
            status: Status::Init,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn plan(&self) -> &[Section] {
        &self.plan
    }

    pub fn research_notes(&self) -> &[ResearchNote] {
        &self.research_notes
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn critique(&self) -> Option<&str> {
        self.critique.as_deref()
    }

    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    pub fn max_revisions(&self) -> u32 {
        self.max_revisions
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn latest_history_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// 是否还有修订预算
    pub fn can_revise(&self) -> bool {
        self.revision_count < self.max_revisions
    }

    pub fn has_issued_query(&self, query: &str) -> bool {
        self.queries.iter().any(|q| q.eq_ignore_ascii_case(query.trim()))
    }

    pub fn has_source(&self, url: &str) -> bool {
        self.research_notes.iter().any(|n| n.source_url == url)
    }

    // ========== 以下方法只由编排器调用 ==========

    pub(crate) fn transition(&mut self, next: Status) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(WorkflowError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        let entering_draft_state = matches!(
            next,
            Status::Reflecting | Status::Critiquing | Status::Complete
        );
        if entering_draft_state && self.draft.trim().is_empty() {
            return Err(WorkflowError::validation(format!(
                "进入 {} 时草稿不能为空",
                next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// 失败是所有非终态都可以到达的
    pub(crate) fn mark_failed(&mut self) {
        if !self.status.is_terminal() {
            self.status = Status::Failed;
        }
    }

    pub(crate) fn set_plan(&mut self, plan: Vec<Section>) -> Result<(), WorkflowError> {
        if plan.is_empty() {
            return Err(WorkflowError::validation("大纲为空，无法据此检索"));
        }
        if !self.research_notes.is_empty() || self.revision_count > 0 {
            return Err(WorkflowError::validation("检索开始后大纲不可再修改"));
        }
        self.plan = plan;
        Ok(())
    }

    pub(crate) fn append_research(&mut self, queries: Vec<String>, notes: Vec<ResearchNote>) {
        self.queries.extend(queries);
        self.research_notes.extend(notes);
    }

    pub(crate) fn replace_draft(&mut self, draft: String) -> Result<(), WorkflowError> {
        if draft.trim().is_empty() {
            return Err(WorkflowError::validation("草稿为空"));
        }
        self.draft = draft;
        Ok(())
    }

    pub(crate) fn set_critique(&mut self, critique: Option<String>) {
        self.critique = critique.filter(|c| !c.trim().is_empty());
    }

    pub(crate) fn increment_revision(&mut self) -> Result<(), WorkflowError> {
        if !self.can_revise() {
            return Err(WorkflowError::validation(format!(
                "修订次数 {} 已达上限 {}",
                self.revision_count, self.max_revisions
            )));
        }
        self.revision_count += 1;
        Ok(())
    }

    pub(crate) fn record(
        &mut self,
        stage: StageName,
        kind: EntryKind,
        input_summary: impl Into<String>,
        output_summary: impl Into<String>,
    ) {
        let ordinal = self.history.len() as u64 + 1;
        self.history.push(HistoryEntry {
            stage,
            ordinal,
            kind,
            input_summary: input_summary.into(),
            output_summary: output_summary.into(),
        });
    }
}
