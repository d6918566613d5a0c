//! 编排引擎（状态机）
//!
//! ```text
//! INIT → PLANNING → RESEARCHING → DRAFTING → REFLECTING ─┬─ 接受 ──────────────→ COMPLETE
//!                        ↑                               ├─ 修改 且 预算已用完 ─→ COMPLETE (budget-exhausted)
//!                        └──────── CRITIQUING ←──────────┘─ 修改 且 仍有预算
//! 任意非终态 ── 不可恢复错误 / 取消 ──→ FAILED
//! ```
//!
//! 编排器是 [`WorkflowState`] 唯一的写者：阶段函数只读状态并返回产出，
//! 由这里校验、提交、写 history、广播快照。每个状态迁移边界都检查取消。

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, WorkflowError};
use crate::services::ResultSink;
use crate::utils::logging::truncate_text;
use crate::workflow::stages::{critic, drafter, planner, reflector, researcher, StageDeps};
use crate::workflow::{
    CompletionReason, EntryKind, FinalResult, Section, StageName, Status, Verdict,
    WorkflowRequest, WorkflowState,
};

/// 暂停期间允许的人工修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amendment {
    /// 替换大纲，只能在 Planner 之后、检索之前
    Plan(Vec<Section>),
    /// 替换草稿，必须非空
    Draft(String),
    /// 替换 critique，空字符串表示清除
    Critique(String),
}

/// 编排器对控制指令的答复
pub type ControlReply = oneshot::Sender<Result<(), ControlError>>;

/// 发给正在运行的编排器的控制指令
///
/// 每条指令都绑定发送方看到的暂停序号（[`RunSnapshot::pause_seq`]），
/// 只在那一次暂停中生效；暂停结束后到达的指令一律拒绝。
#[derive(Debug)]
pub enum ControlCommand {
    Resume {
        pause_seq: u64,
        reply: ControlReply,
    },
    Amend {
        pause_seq: u64,
        amendment: Amendment,
        reply: ControlReply,
    },
}

impl ControlCommand {
    fn pause_seq(&self) -> u64 {
        match self {
            ControlCommand::Resume { pause_seq, .. } | ControlCommand::Amend { pause_seq, .. } => {
                *pause_seq
            }
        }
    }

    fn reject(self, error: ControlError) {
        let reply = match self {
            ControlCommand::Resume { reply, .. } | ControlCommand::Amend { reply, .. } => reply,
        };
        let _ = reply.send(Err(error));
    }
}

/// 每次提交后广播的快照
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub state: Arc<WorkflowState>,
    /// 正在某阶段之后暂停
    pub paused_after: Option<StageName>,
    /// 已开始的暂停次数，当前暂停的序号
    pub pause_seq: u64,
}

impl RunSnapshot {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            state: Arc::new(state),
            paused_after: None,
            pause_seq: 0,
        }
    }
}

/// 一次运行的外部控制面
pub struct RunControl {
    pub cancel: CancellationToken,
    pub snapshots: Option<watch::Sender<RunSnapshot>>,
    pub commands: Option<mpsc::Receiver<ControlCommand>>,
}

impl RunControl {
    /// 无人观察、不可暂停，只能通过 token 取消
    pub fn detached(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            snapshots: None,
            commands: None,
        }
    }
}

/// 运行中止的原因
#[derive(Debug)]
enum Halt {
    Cancelled,
    Failed {
        stage: Option<StageName>,
        error: WorkflowError,
    },
}

impl Halt {
    fn at(stage: StageName) -> impl FnOnce(WorkflowError) -> Halt {
        move |error| Halt::Failed {
            stage: Some(stage),
            error,
        }
    }
}

/// 编排器
///
/// 持有共享的能力接口，本身无会话状态；一个实例可以并发驱动多次运行，
/// 每次运行拥有自己的 [`WorkflowState`]。
pub struct Orchestrator {
    deps: StageDeps,
    sink: Option<Arc<dyn ResultSink>>,
}

impl Orchestrator {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 运行到终态，不可取消、不可暂停
    pub async fn run(&self, request: WorkflowRequest) -> FinalResult {
        self.run_with(request, RunControl::detached(CancellationToken::new()))
            .await
    }

    /// 运行到终态
    ///
    /// 调用方总会拿到 [`FinalResult`]；所有错误都折叠进 `reason`。
    pub async fn run_with(&self, request: WorkflowRequest, control: RunControl) -> FinalResult {
        let started_at = Utc::now();
        let mut run = Run::new(&request, control);

        let reason = match request.validate() {
            Err(error) => {
                warn!("{} 请求不合法: {}", run.tag, error);
                CompletionReason::Failed { stage: None, error }
            }
            Ok(()) => {
                info!("{} 🚀 开始: {}", run.tag, truncate_text(&request.topic, 60));
                match self.drive(&mut run).await {
                    Ok(reason) => reason,
                    Err(Halt::Cancelled) => CompletionReason::Cancelled,
                    Err(Halt::Failed { stage, error }) => {
                        if let Some(stage) = stage {
                            run.state.record(
                                stage,
                                EntryKind::Failed,
                                format!("状态 {}", run.state.status()),
                                format!("{}: {}", error.class(), error),
                            );
                        }
                        CompletionReason::Failed { stage, error }
                    }
                }
            }
        };

        if !matches!(reason, CompletionReason::Satisfied | CompletionReason::BudgetExhausted) {
            run.state.mark_failed();
        }
        run.publish(None);
        run.close_commands();

        let result = FinalResult {
            state: run.state,
            reason,
            started_at,
            finished_at: Utc::now(),
        };
        log_outcome(&run.tag, &result);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.save(&result).await {
                error!("{} 结果保存失败: {}", run.tag, e);
            }
        }

        result
    }

    async fn drive(&self, run: &mut Run) -> Result<CompletionReason, Halt> {
        let deps = &self.deps;

        // ========== PLANNING ==========
        run.enter(Status::Planning)?;
        let sections = guarded(
            &run.cancel,
            StageName::Planner,
            planner::plan(deps, run.state.topic()),
        )
        .await?;
        if sections.is_empty() {
            return Err(Halt::Failed {
                stage: Some(StageName::Planner),
                error: WorkflowError::validation("Planner 返回了空大纲"),
            });
        }
        let section_count = sections.len();
        run.state.set_plan(sections).map_err(Halt::at(StageName::Planner))?;
        run.state.record(
            StageName::Planner,
            EntryKind::Completed,
            format!("主题: {}", truncate_text(run.state.topic(), 60)),
            format!("{} 个章节", section_count),
        );
        info!("{} ✓ 大纲完成: {} 个章节", run.tag, section_count);
        run.checkpoint(StageName::Planner).await?;

        loop {
            // ========== RESEARCHING ==========
            run.enter(Status::Researching)?;
            let output = guarded(
                &run.cancel,
                StageName::Researcher,
                researcher::research(deps, &run.state),
            )
            .await?;
            let (query_count, note_count) = (output.queries.len(), output.notes.len());
            let research_input = match run.state.critique() {
                Some(c) if run.state.revision_count() > 0 => {
                    format!("critique: {}", truncate_text(c, 60))
                }
                _ => format!("大纲 {} 个章节", run.state.plan().len()),
            };
            run.state.append_research(output.queries, output.notes);
            run.state.record(
                StageName::Researcher,
                EntryKind::Completed,
                research_input,
                format!(
                    "{} 个检索词, 新增 {} 条证据, 累计 {} 条",
                    query_count,
                    note_count,
                    run.state.research_notes().len()
                ),
            );
            info!(
                "{} 🔍 检索完成: {} 个检索词, 新增 {} 条证据",
                run.tag, query_count, note_count
            );
            run.checkpoint(StageName::Researcher).await?;

            // ========== DRAFTING ==========
            run.enter(Status::Drafting)?;
            let draft = guarded(
                &run.cancel,
                StageName::Drafter,
                drafter::draft(deps, &run.state),
            )
            .await?;
            let words = draft.split_whitespace().count();
            run.state
                .replace_draft(draft)
                .map_err(Halt::at(StageName::Drafter))?;
            run.state.record(
                StageName::Drafter,
                EntryKind::Completed,
                format!(
                    "{} 条证据, 修订轮次 {}",
                    run.state.research_notes().len(),
                    run.state.revision_count()
                ),
                format!("草稿 {} 词", words),
            );
            info!("{} ✍️ 草稿完成: {} 词", run.tag, words);
            run.checkpoint(StageName::Drafter).await?;

            // ========== REFLECTING ==========
            run.enter(Status::Reflecting)?;
            let verdict = guarded(
                &run.cancel,
                StageName::Reflector,
                reflector::reflect(deps, &run.state),
            )
            .await?;
            let draft_summary = format!("草稿 {} 词", run.state.draft().split_whitespace().count());

            let feedback = match verdict {
                Verdict::Accept => {
                    run.state.set_critique(None);
                    run.state.record(
                        StageName::Reflector,
                        EntryKind::Completed,
                        draft_summary,
                        "accept",
                    );
                    info!("{} ✓ Reflector 认可草稿", run.tag);
                    run.accepted = true;
                    run.checkpoint(StageName::Reflector).await?;
                    run.enter(Status::Complete)?;
                    return Ok(CompletionReason::Satisfied);
                }
                Verdict::Revise(feedback) => feedback,
            };

            run.state.record(
                StageName::Reflector,
                EntryKind::Completed,
                draft_summary,
                format!("revise: {}", truncate_text(&feedback, 80)),
            );
            run.state.set_critique(Some(feedback));

            if !run.state.can_revise() {
                info!(
                    "{} ⚠️ 需要修改但修订预算已用完 ({}/{})",
                    run.tag,
                    run.state.revision_count(),
                    run.state.max_revisions()
                );
                run.checkpoint(StageName::Reflector).await?;
                run.enter(Status::Complete)?;
                return Ok(CompletionReason::BudgetExhausted);
            }
            info!("{} Reflector 要求修改，进入 Critic", run.tag);
            run.checkpoint(StageName::Reflector).await?;

            // ========== CRITIQUING ==========
            run.enter(Status::Critiquing)?;
            let reviewer_feedback = run.state.critique().unwrap_or_default().to_string();
            let brief = guarded(
                &run.cancel,
                StageName::Critic,
                critic::critique(deps, &run.state, &reviewer_feedback),
            )
            .await?;
            run.state.set_critique(Some(brief));
            run.state
                .increment_revision()
                .map_err(Halt::at(StageName::Critic))?;
            run.state.record(
                StageName::Critic,
                EntryKind::Completed,
                format!("意见: {}", truncate_text(&reviewer_feedback, 60)),
                format!(
                    "修改清单 {} 字符, 修订轮次 {}/{}",
                    run.state.critique().map(str::len).unwrap_or_default(),
                    run.state.revision_count(),
                    run.state.max_revisions()
                ),
            );
            info!(
                "{} 📝 修改清单完成，开始第 {}/{} 轮修订",
                run.tag,
                run.state.revision_count(),
                run.state.max_revisions()
            );
            run.checkpoint(StageName::Critic).await?;
        }
    }
}

/// 一次运行的私有上下文
struct Run {
    state: WorkflowState,
    cancel: CancellationToken,
    snapshots: Option<watch::Sender<RunSnapshot>>,
    commands: Option<mpsc::Receiver<ControlCommand>>,
    interrupt_after: Vec<StageName>,
    pause_seq: u64,
    /// Reflector 已认可草稿，之后不再接受 critique
    accepted: bool,
    tag: String,
}

impl Run {
    fn new(request: &WorkflowRequest, control: RunControl) -> Self {
        Self {
            state: WorkflowState::new(request),
            cancel: control.cancel,
            snapshots: control.snapshots,
            commands: control.commands,
            interrupt_after: request.interrupt_after.clone(),
            pause_seq: 0,
            accepted: false,
            tag: format!("[会话 {}]", request.id.short()),
        }
    }

    fn publish(&self, paused_after: Option<StageName>) {
        if let Some(tx) = &self.snapshots {
            tx.send_replace(RunSnapshot {
                state: Arc::new(self.state.clone()),
                paused_after,
                pause_seq: self.pause_seq,
            });
        }
    }

    /// 迁移边界：先检查取消，再迁移状态
    fn enter(&mut self, next: Status) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.state
            .transition(next)
            .map_err(Halt::at(stage_for(next)))?;
        self.publish(None);
        Ok(())
    }

    /// 阶段产出已提交：广播、按需暂停、检查取消
    async fn checkpoint(&mut self, stage: StageName) -> Result<(), Halt> {
        self.publish(None);
        self.reject_pending();
        if self.interrupt_after.contains(&stage) {
            self.pause(stage).await?;
        }
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    async fn pause(&mut self, stage: StageName) -> Result<(), Halt> {
        let Some(mut commands) = self.commands.take() else {
            warn!("{} 没有控制通道，忽略 {} 之后的暂停", self.tag, stage);
            return Ok(());
        };

        self.pause_seq += 1;
        info!("{} ⏸️ 在 {} 之后暂停 (#{})", self.tag, stage, self.pause_seq);
        self.publish(Some(stage));
        let outcome = self.wait_for_resume(&mut commands, stage).await;
        self.commands = Some(commands);
        outcome?;

        info!("{} ▶️ 继续运行", self.tag);
        self.publish(None);
        self.reject_pending();
        Ok(())
    }

    /// 不在暂停中：队列里的指令都属于已结束的暂停
    fn reject_pending(&mut self) {
        let Some(commands) = self.commands.as_mut() else {
            return;
        };
        while let Ok(command) = commands.try_recv() {
            let seq = command.pause_seq();
            debug!("{} 丢弃过期指令 (暂停 #{})", self.tag, seq);
            command.reject(ControlError::StalePause(seq));
        }
    }

    /// 运行结束：关闭控制通道，答复所有未处理的指令
    fn close_commands(&mut self) {
        let Some(mut commands) = self.commands.take() else {
            return;
        };
        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.reject(ControlError::Finished);
        }
    }

    async fn wait_for_resume(
        &mut self,
        commands: &mut mpsc::Receiver<ControlCommand>,
        stage: StageName,
    ) -> Result<(), Halt> {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                command = commands.recv() => command,
            };

            let Some(command) = command else {
                return Ok(());
            };
            let seq = command.pause_seq();
            if seq != self.pause_seq {
                debug!("{} 丢弃过期指令 (暂停 #{}, 当前 #{})", self.tag, seq, self.pause_seq);
                command.reject(ControlError::StalePause(seq));
                continue;
            }

            match command {
                ControlCommand::Resume { reply, .. } => {
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                ControlCommand::Amend {
                    amendment, reply, ..
                } => {
                    let outcome = apply_amendment(&mut self.state, stage, self.accepted, amendment);
                    match &outcome {
                        Ok(()) => {
                            info!("{} 已应用人工修改", self.tag);
                            self.publish(Some(stage));
                        }
                        Err(e) => warn!("{} 人工修改被拒绝: {}", self.tag, e),
                    }
                    let _ = reply.send(outcome.map_err(ControlError::Amendment));
                }
            }
        }
    }
}

/// 在取消信号和阶段执行之间竞争
///
/// 阶段执行期间收到取消时，丢弃该阶段的产出。
async fn guarded<T, F>(cancel: &CancellationToken, stage: StageName, stage_fut: F) -> Result<T, Halt>
where
    F: Future<Output = Result<T, WorkflowError>>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Halt::Cancelled),
        outcome = stage_fut => outcome,
    };
    if cancel.is_cancelled() {
        return Err(Halt::Cancelled);
    }
    outcome.map_err(Halt::at(stage))
}

fn apply_amendment(
    state: &mut WorkflowState,
    paused_after: StageName,
    accepted: bool,
    amendment: Amendment,
) -> Result<(), WorkflowError> {
    let summary = match amendment {
        Amendment::Plan(sections) => {
            if paused_after != StageName::Planner {
                return Err(WorkflowError::amendment("大纲只能在 Planner 之后修改"));
            }
            let count = sections.len();
            state
                .set_plan(sections)
                .map_err(|e| WorkflowError::amendment(e.to_string()))?;
            format!("大纲 {} 个章节", count)
        }
        Amendment::Draft(text) => {
            if state.draft().is_empty() {
                return Err(WorkflowError::amendment("还没有草稿可供修改"));
            }
            let words = text.split_whitespace().count();
            state
                .replace_draft(text)
                .map_err(|e| WorkflowError::amendment(e.to_string()))?;
            format!("草稿 {} 词", words)
        }
        Amendment::Critique(text) => {
            if accepted {
                return Err(WorkflowError::amendment("草稿已被认可，不能再写入 critique"));
            }
            let chars = text.trim().len();
            state.set_critique(Some(text));
            if chars == 0 {
                "critique 已清除".to_string()
            } else {
                format!("critique {} 字符", chars)
            }
        }
    };

    state.record(paused_after, EntryKind::Amended, "人工修改", summary);
    Ok(())
}

/// 进入某状态时负责的阶段
fn stage_for(status: Status) -> StageName {
    match status {
        Status::Init | Status::Planning => StageName::Planner,
        Status::Researching => StageName::Researcher,
        Status::Drafting => StageName::Drafter,
        Status::Reflecting | Status::Complete | Status::Failed => StageName::Reflector,
        Status::Critiquing => StageName::Critic,
    }
}

fn log_outcome(tag: &str, result: &FinalResult) {
    let state = &result.state;
    match &result.reason {
        CompletionReason::Satisfied | CompletionReason::BudgetExhausted => info!(
            "{} ✅ 完成 ({}): {} 词, 修订 {} 次, {} 条证据",
            tag,
            result.reason,
            result.word_count(),
            state.revision_count(),
            state.research_notes().len()
        ),
        CompletionReason::Cancelled => warn!("{} ⏹️ 已取消 (状态 {})", tag, state.status()),
        CompletionReason::Failed { stage, error } => error!(
            "{} ❌ 失败于 {}: {}",
            tag,
            stage.map(|s| s.as_str()).unwrap_or("请求校验"),
            error
        ),
    }
}
