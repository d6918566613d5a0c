//! Drafter：大纲 + 全部证据 + 上一稿 + critique → 整篇替换的新草稿

use serde_json::json;
use tracing::debug;

use crate::error::WorkflowError;
use crate::workflow::stages::{prompts, StageDeps};
use crate::workflow::state::WorkflowState;
use crate::workflow::StageName;

/// 写出新草稿
///
/// 没有证据时照样只根据大纲写；空输出由编排器判定为校验失败。
pub async fn draft(deps: &StageDeps, state: &WorkflowState) -> Result<String, WorkflowError> {
    let mut context = json!({
        "topic": state.topic(),
        "plan": state.plan(),
        "research_notes": state.research_notes(),
    });

    if !state.draft().is_empty() {
        context["previous_draft"] = json!(state.draft());
    }
    if let Some(critique) = state.critique() {
        context["critique"] = json!(critique);
    }

    debug!(
        "Drafter 输入: {} 个章节, {} 条证据, 修订轮次 {}",
        state.plan().len(),
        state.research_notes().len(),
        state.revision_count()
    );

    deps.generate(StageName::Drafter, prompts::DRAFTER, context).await
}
