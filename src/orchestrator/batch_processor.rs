//! 批量主题处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量主题的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建生成 / 检索客户端、结果写入器、会话管理器
//! 2. **批量启动**：每个主题一个会话，并发数由会话管理器的 Semaphore 限制
//! 3. **暂停处理**：配置了 `interrupt_after` 时，记录暂停点的状态后自动继续
//! 4. **全局统计**：汇总所有会话的完成原因
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个阶段的细节
//! - **向下委托**：委托 SessionManager 运行单个会话

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clients::{LlmClient, SearchClient};
use crate::config::Config;
use crate::error::{AppResult, SessionError};
use crate::orchestrator::engine::Orchestrator;
use crate::orchestrator::session_manager::SessionManager;
use crate::services::{JsonResultWriter, RetryPolicy};
use crate::utils::logging::{separator, truncate_text};
use crate::workflow::{
    CompletionReason, FinalResult, SessionId, StageDeps, StageName, StageSettings,
    WorkflowRequest,
};

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 应用主结构
pub struct App {
    config: Config,
    manager: SessionManager,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> AppResult<Self> {
        config.validate()?;
        log_startup(&config);

        if config.llm_api_key.is_empty() {
            warn!("⚠️ 未配置 LLM_API_KEY");
        }
        if config.search_api_key.is_empty() {
            warn!("⚠️ 未配置 TAVILY_API_KEY");
        }

        let generator = Arc::new(LlmClient::new(&config));
        let search = Arc::new(SearchClient::new(&config)?);

        let deps = StageDeps::new(generator, search)
            .with_retry(RetryPolicy::from_config(&config))
            .with_settings(StageSettings::from_config(&config));
        let orchestrator = Orchestrator::new(deps)
            .with_sink(Arc::new(JsonResultWriter::new(config.output_dir.clone())));
        let manager = SessionManager::from_config(Arc::new(orchestrator), &config);

        Ok(Self { config, manager })
    }

    /// 使用现成的会话管理器（测试或嵌入时）
    pub fn with_manager(config: Config, manager: SessionManager) -> Self {
        Self { config, manager }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// 运行所有主题直到结束
    pub async fn run(&self, topics: Vec<String>) -> Result<ProcessingStats> {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if topics.is_empty() {
            warn!("⚠️ 没有待处理的主题，程序结束");
            return Ok(ProcessingStats::default());
        }

        log_topics_loaded(topics.len(), self.config.max_concurrent_sessions);

        let mut session_ids = Vec::with_capacity(topics.len());
        for (idx, topic) in topics.iter().enumerate() {
            let request = WorkflowRequest::new(topic.as_str(), self.config.default_max_revisions)
                .with_interrupt_after(self.config.interrupt_after.iter().copied());
            let id = self
                .manager
                .start_session(request)
                .await
                .with_context(|| format!("主题 {} 启动失败", idx + 1))?;
            info!("[主题 {}] {} → 会话 {}", idx + 1, truncate_text(topic, 40), id.short());
            session_ids.push(id);
        }

        let results = join_all(session_ids.iter().map(|id| self.drive_to_end(*id))).await;

        let mut stats = ProcessingStats {
            total: session_ids.len(),
            ..Default::default()
        };
        for (id, result) in session_ids.iter().zip(results) {
            match result {
                Ok(result) => {
                    log_session_result(&result);
                    stats.add(&result.reason);
                }
                Err(e) => {
                    error!("[会话 {}] ❌ 无法取得结果: {}", id.short(), e);
                    stats.failed += 1;
                }
            }
        }

        print_final_stats(&stats, &self.config);
        Ok(stats)
    }

    /// 等待会话结束；暂停时记录状态并自动继续
    async fn drive_to_end(&self, id: SessionId) -> Result<Arc<FinalResult>, SessionError> {
        loop {
            match tokio::time::timeout(PAUSE_POLL_INTERVAL, self.manager.wait_for_result(id)).await
            {
                Ok(result) => return result,
                Err(_) => {
                    let progress = self.manager.get_progress(id).await?;
                    let Some(stage) = progress.paused_after else {
                        continue;
                    };
                    let state = self.manager.get_state(id).await?;
                    info!(
                        "[会话 {}] ⏸️ {} 之后暂停: 大纲 {} 节, 证据 {} 条, 草稿 {} 词, 修订 {}/{}",
                        id.short(),
                        stage,
                        state.plan().len(),
                        state.research_notes().len(),
                        state.draft().split_whitespace().count(),
                        state.revision_count(),
                        state.max_revisions()
                    );
                    match self.manager.resume(id).await {
                        Ok(()) | Err(SessionError::NotPaused(_)) | Err(SessionError::Finished(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

/// 处理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total: usize,
    /// Reflector 认可
    pub satisfied: usize,
    /// 预算用完，仍有文章
    pub budget_exhausted: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl ProcessingStats {
    fn add(&mut self, reason: &CompletionReason) {
        match reason {
            CompletionReason::Satisfied => self.satisfied += 1,
            CompletionReason::BudgetExhausted => self.budget_exhausted += 1,
            CompletionReason::Cancelled => self.cancelled += 1,
            CompletionReason::Failed { .. } => self.failed += 1,
        }
    }

    pub fn with_document(&self) -> usize {
        self.satisfied + self.budget_exhausted
    }
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", separator('='));
    info!("🚀 程序启动 - 多会话文章生成模式");
    info!("📊 最大并发会话数: {}", config.max_concurrent_sessions);
    info!("🔁 修订次数上限: {}", config.default_max_revisions);
    if !config.interrupt_after.is_empty() {
        let stages: Vec<&str> = config.interrupt_after.iter().map(|s| s.as_str()).collect();
        info!("⏸️ 暂停点: {}", stages.join(", "));
    }
    info!("{}", separator('='));
}

fn log_topics_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 共 {} 个主题", total);
    info!("📋 最多同时运行 {} 个会话\n", max_concurrent);
}

fn log_session_result(result: &FinalResult) {
    let state = &result.state;
    let elapsed = result.finished_at - result.started_at;
    info!("\n{}", separator('─'));
    info!("[会话 {}] {}", result.session_id().short(), truncate_text(state.topic(), 60));
    info!(
        "结果: {} | 草稿 {} 词 | 修订 {} 次 | 证据 {} 条 | 耗时 {} 秒",
        result.reason,
        result.word_count(),
        state.revision_count(),
        state.research_notes().len(),
        elapsed.num_seconds()
    );
    debug!(
        "阶段调用: drafter {} 次, critic {} 次, history {} 条",
        result.invocations(StageName::Drafter),
        result.invocations(StageName::Critic),
        state.history().len()
    );
    info!("{}", separator('─'));
}

fn print_final_stats(stats: &ProcessingStats, config: &Config) {
    info!("\n{}", separator('='));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", separator('='));
    info!("✅ 认可: {}/{}", stats.satisfied, stats.total);
    info!("⚠️ 预算用完: {}", stats.budget_exhausted);
    info!("⏹️ 取消: {}", stats.cancelled);
    info!("❌ 失败: {}", stats.failed);
    info!("{}", separator('='));
    info!("\n结果已保存至: {}", config.output_dir.display());
}
