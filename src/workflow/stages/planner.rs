//! Planner：主题 → 有序章节大纲

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::WorkflowError;
use crate::workflow::stages::{parse_json_reply, prompts, strip_list_marker, StageDeps};
use crate::workflow::state::Section;
use crate::workflow::StageName;

#[derive(Debug, Deserialize)]
struct PlanReply {
    sections: Vec<Section>,
}

/// 生成大纲
///
/// 空大纲在这里原样返回，由编排器判定为校验失败。
pub async fn plan(deps: &StageDeps, topic: &str) -> Result<Vec<Section>, WorkflowError> {
    let reply = deps
        .generate(StageName::Planner, prompts::PLANNER, json!({ "topic": topic }))
        .await?;

    let sections = parse_plan(&reply);
    debug!("Planner 解析出 {} 个章节", sections.len());
    Ok(sections)
}

/// 解析大纲：优先 JSON，退化为逐行标题
fn parse_plan(reply: &str) -> Vec<Section> {
    if let Some(parsed) = parse_json_reply::<PlanReply>(reply) {
        return parsed
            .sections
            .into_iter()
            .filter(|s| !s.title.trim().is_empty())
            .map(|s| Section::new(s.title.trim(), s.summary.trim()))
            .collect();
    }

    if !reply.trim().is_empty() {
        warn!("Planner 输出不是 JSON，按标题行解析");
    }
    parse_outline_lines(reply)
}

/// 标题行（`#`、列表项、编号）开启新章节，其余非空行并入当前章节摘要
fn parse_outline_lines(reply: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for raw in reply.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let is_heading = line.starts_with('#')
            || (!raw.starts_with(char::is_whitespace) && strip_list_marker(line) != line);

        if is_heading || sections.is_empty() {
            let title = strip_list_marker(line.trim_start_matches('#'));
            let title = title.trim_matches('*').trim();
            if !title.is_empty() {
                sections.push(Section::new(title, ""));
            }
            continue;
        }

        if let Some(current) = sections.last_mut() {
            let note = strip_list_marker(line);
            if !current.summary.is_empty() {
                current.summary.push(' ');
            }
            current.summary.push_str(note);
        }
    }

    sections
}
