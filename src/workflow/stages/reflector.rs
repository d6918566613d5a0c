//! Reflector：评审草稿，给出接受 / 修改判定
//!
//! 这是接受与否的唯一裁决者，其它组件不做二次判断。

use serde_json::json;

use crate::error::WorkflowError;
use crate::workflow::stages::{prompts, StageDeps};
use crate::workflow::state::WorkflowState;
use crate::workflow::verdict::Verdict;
use crate::workflow::StageName;

pub async fn reflect(deps: &StageDeps, state: &WorkflowState) -> Result<Verdict, WorkflowError> {
    let reply = deps
        .generate(
            StageName::Reflector,
            prompts::REFLECTOR,
            json!({
                "topic": state.topic(),
                "plan": state.plan(),
                "draft": state.draft(),
            }),
        )
        .await?;

    Ok(deps.verdicts.parse(&reply))
}
