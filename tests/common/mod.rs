//! 集成测试用的内存实现：按阶段编排回复的生成器、可注入错误的检索、记录结果的 sink

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use essay_workflow::error::PersistenceError;
use essay_workflow::orchestrator::{Orchestrator, SessionManager};
use essay_workflow::workflow::StageSettings;
use essay_workflow::{
    CapabilityError, FinalResult, ResultSink, RetryPolicy, SearchHit, SessionId, StageDeps,
    StageName, TextGenerator, WebSearch,
};

type Reply = Result<String, CapabilityError>;

/// 按 `context["stage"]` 分派回复
///
/// 某阶段的脚本用完后，最后一条回复会一直重复；没有脚本时使用内置默认回复。
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    hang: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, JsonValue)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: StageName, text: &str) -> Self {
        self.push(stage, Ok(text.to_string()))
    }

    pub fn fail(self, stage: StageName, error: CapabilityError) -> Self {
        self.push(stage, Err(error))
    }

    /// 该阶段的调用永不返回
    pub fn hang(self, stage: StageName) -> Self {
        self.hang.lock().unwrap().insert(stage.as_str().to_string());
        self
    }

    fn push(self, stage: StageName, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage.as_str().to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// 某阶段被调用的次数（包括重试）
    pub fn calls(&self, stage: StageName) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == stage.as_str())
            .count()
    }

    /// 某阶段每次调用收到的上下文
    pub fn contexts(&self, stage: StageName) -> Vec<JsonValue> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == stage.as_str())
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn next_reply(&self, stage: &str, context: &JsonValue) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        let mut sticky = self.sticky.lock().unwrap();
        if let Some(reply) = scripts.get_mut(stage).and_then(VecDeque::pop_front) {
            sticky.insert(stage.to_string(), reply.clone());
            return reply;
        }
        if let Some(reply) = sticky.get(stage) {
            return reply.clone();
        }
        Ok(default_reply(stage, context))
    }
}

fn default_reply(stage: &str, context: &JsonValue) -> String {
    let topic = context["topic"].as_str().unwrap_or_default();
    match stage {
        "planner" => format!(
            r#"{{"sections": [{{"title": "Background", "summary": "{topic}"}}, {{"title": "Analysis", "summary": "key evidence"}}]}}"#
        ),
        "researcher" => format!(r#"{{"queries": ["{topic} overview", "{topic} statistics"]}}"#),
        "drafter" => format!("An essay about {topic}."),
        "reflector" => "VERDICT: ACCEPT".to_string(),
        "critic" => "Add concrete figures.".to_string(),
        _ => String::new(),
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, context: &JsonValue) -> Result<String, CapabilityError> {
        let stage = context["stage"].as_str().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((stage.clone(), context.clone()));

        let hangs = self.hang.lock().unwrap().contains(&stage);
        if hangs {
            futures::future::pending::<()>().await;
        }
        self.next_reply(&stage, context)
    }
}

/// 检索：先按顺序吐出注入的错误，然后每个检索词返回两个固定结果
#[derive(Default)]
pub struct ScriptedSearch {
    errors: Mutex<VecDeque<CapabilityError>>,
    attempts: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_first(self, error: CapabilityError, times: usize) -> Self {
        {
            let mut errors = self.errors.lock().unwrap();
            for _ in 0..times {
                errors.push_back(error.clone());
            }
        }
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 成功返回结果的检索词
    pub fn answered_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CapabilityError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.queries.lock().unwrap().push(query.to_string());

        let slug: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Ok((1..=2)
            .map(|i| SearchHit {
                url: format!("https://example.org/{slug}/{i}"),
                excerpt: format!("Finding {i} for {query}"),
            })
            .collect())
    }
}

/// 记录所有保存过的结果
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<FinalResult>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<FinalResult> {
        self.saved.lock().unwrap().clone()
    }

    pub fn saved_for(&self, id: SessionId) -> usize {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.session_id() == id)
            .count()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn save(&self, result: &FinalResult) -> Result<(), PersistenceError> {
        self.saved.lock().unwrap().push(result.clone());
        Ok(())
    }
}

/// 一套测试依赖
pub struct Harness {
    pub generator: Arc<ScriptedGenerator>,
    pub search: Arc<ScriptedSearch>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(generator: ScriptedGenerator, search: ScriptedSearch) -> Self {
        Self {
            generator: Arc::new(generator),
            search: Arc::new(search),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub fn deps(&self) -> StageDeps {
        StageDeps::new(self.generator.clone(), self.search.clone())
            .with_retry(RetryPolicy::immediate(4))
            .with_settings(StageSettings::default())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.deps()).with_sink(self.sink.clone())
    }

    pub fn session_manager(&self, max_concurrent: usize) -> SessionManager {
        SessionManager::new(Arc::new(self.orchestrator()), max_concurrent)
    }
}

/// 轮询直到条件成立，最多等 5 秒
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn revise(feedback: &str) -> String {
    format!("VERDICT: REVISE\n{feedback}")
}
