//! Critic：把 Reflector 粗粒度的"需要修改"翻译成可执行的修改清单

use serde_json::json;

use crate::error::WorkflowError;
use crate::workflow::stages::{prompts, StageDeps};
use crate::workflow::state::WorkflowState;
use crate::workflow::StageName;

/// 生成扩展后的 critique，替换 Reflector 的原始意见
pub async fn critique(
    deps: &StageDeps,
    state: &WorkflowState,
    reviewer_feedback: &str,
) -> Result<String, WorkflowError> {
    let brief = deps
        .generate(
            StageName::Critic,
            prompts::CRITIC,
            json!({
                "topic": state.topic(),
                "plan": state.plan(),
                "draft": state.draft(),
                "critique": reviewer_feedback,
            }),
        )
        .await?;

    if brief.is_empty() {
        return Err(WorkflowError::validation("Critic 返回了空的修改清单"));
    }
    Ok(brief)
}
