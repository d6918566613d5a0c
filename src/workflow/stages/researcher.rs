//! Researcher：生成检索词 → 检索 → 按来源 URL 去重
//!
//! 首轮检索词来自大纲，修订轮来自 critique；已经发出过的检索词不会再发。

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::services::{call_with_retry, SearchHit, WebSearch};
use crate::workflow::stages::{parse_json_reply, prompts, strip_list_marker, StageDeps};
use crate::workflow::state::{ResearchNote, WorkflowState};
use crate::workflow::StageName;

/// 本轮检索产出（待追加到状态）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchOutput {
    /// 本轮实际发出的检索词，按发出顺序
    pub queries: Vec<String>,
    /// 去重后的新证据，按检索词顺序
    pub notes: Vec<ResearchNote>,
}

#[derive(Debug, Deserialize)]
struct QueriesReply {
    queries: Vec<String>,
}

pub async fn research(
    deps: &StageDeps,
    state: &WorkflowState,
) -> Result<ResearchOutput, WorkflowError> {
    let candidates = propose_queries(deps, state).await?;
    let queries = fresh_queries(candidates, state);

    if queries.is_empty() {
        info!("Researcher 没有新的检索词，本轮不追加证据");
        return Ok(ResearchOutput::default());
    }

    let batches = run_queries(deps, &queries).await?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut notes = Vec::new();
    for (query, hits) in queries.iter().zip(batches) {
        if hits.is_empty() {
            debug!("检索词 '{}' 没有结果", query);
        }
        for hit in hits.into_iter().take(deps.settings.results_per_query) {
            let url = hit.url.trim().to_string();
            if url.is_empty() || state.has_source(&url) || !seen.insert(url.clone()) {
                continue;
            }
            notes.push(ResearchNote {
                query: query.clone(),
                source_url: url,
                excerpt: hit.excerpt.trim().to_string(),
            });
        }
    }

    Ok(ResearchOutput { queries, notes })
}

/// 让生成能力提出检索词
async fn propose_queries(
    deps: &StageDeps,
    state: &WorkflowState,
) -> Result<Vec<String>, WorkflowError> {
    let (prompt, context, limit) = match state.critique() {
        Some(critique) if state.revision_count() > 0 => (
            prompts::with_query_limit(
                prompts::RESEARCH_FROM_CRITIQUE,
                deps.settings.max_revision_queries,
            ),
            json!({
                "topic": state.topic(),
                "critique": critique,
                "previous_queries": state.queries(),
            }),
            deps.settings.max_revision_queries,
        ),
        _ => (
            prompts::with_query_limit(
                prompts::RESEARCH_FROM_PLAN,
                deps.settings.max_initial_queries,
            ),
            json!({
                "topic": state.topic(),
                "plan": state.plan(),
            }),
            deps.settings.max_initial_queries,
        ),
    };

    let reply = deps
        .generate(StageName::Researcher, &prompt, context)
        .await?;

    let mut queries = parse_queries(&reply);
    queries.truncate(limit);
    Ok(queries)
}

fn parse_queries(reply: &str) -> Vec<String> {
    let raw: Vec<String> = match parse_json_reply::<QueriesReply>(reply) {
        Some(parsed) => parsed.queries,
        None => {
            if !reply.trim().is_empty() {
                warn!("Researcher 检索词不是 JSON，按行解析");
            }
            reply.lines().map(|l| strip_list_marker(l).to_string()).collect()
        }
    };

    raw.into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// 去掉已发出过的和本轮重复的检索词
fn fresh_queries(candidates: Vec<String>, state: &WorkflowState) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .filter(|q| {
            if state.has_issued_query(q) {
                debug!("跳过已检索过的检索词: {}", q);
                return false;
            }
            seen.insert(q.to_ascii_lowercase())
        })
        .collect()
}

/// 执行检索；并发时结果仍按检索词顺序返回
async fn run_queries(
    deps: &StageDeps,
    queries: &[String],
) -> Result<Vec<Vec<SearchHit>>, WorkflowError> {
    let search: &dyn WebSearch = deps.search.as_ref();

    if deps.settings.parallel_queries {
        let calls = queries.iter().map(|query| search_one(deps, search, query));
        return join_all(calls).await.into_iter().collect();
    }

    let mut batches = Vec::with_capacity(queries.len());
    for query in queries {
        batches.push(search_one(deps, search, query).await?);
    }
    Ok(batches)
}

async fn search_one(
    deps: &StageDeps,
    search: &dyn WebSearch,
    query: &str,
) -> Result<Vec<SearchHit>, WorkflowError> {
    debug!("检索: {}", query);
    call_with_retry(&deps.retry, "researcher.search", move || search.search(query)).await
}
