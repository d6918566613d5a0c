//! 会话管理器
//!
//! 每个会话 = 一个独立的 tokio 任务 + 私有的 [`WorkflowState`]，会话之间没有共享的可变状态。
//! 管理器只持有：
//! - 快照接收端（编排器每次提交后广播，只读）
//! - 取消 token
//! - 控制通道（resume / amend，由编排器自己应用）
//! - 结果接收端
//!
//! 并发数由 Semaphore 限制；排队中的会话同样可以取消。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ControlError, SessionError, WorkflowError};
use crate::orchestrator::engine::{
    Amendment, ControlCommand, ControlReply, Orchestrator, RunControl, RunSnapshot,
};
use crate::workflow::{
    FinalResult, HistoryEntry, SessionId, StageName, Status, WorkflowRequest, WorkflowState,
};

const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// 进度快照
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub status: Status,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub latest_history_entry: Option<HistoryEntry>,
    /// 正在某阶段之后暂停，等待 resume / amend / cancel
    pub paused_after: Option<StageName>,
}

/// `get_result` 的返回
#[derive(Debug, Clone)]
pub enum SessionResult {
    Pending,
    Ready(Arc<FinalResult>),
}

/// 取消请求的确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// 已发出取消信号，会话将在下一个迁移边界停止
    Requested,
    /// 会话早已结束，取消无效果
    AlreadyFinished,
}

/// 会话列表项
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub topic: String,
    pub status: Status,
    pub paused_after: Option<StageName>,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
}

struct SessionHandle {
    cancel: CancellationToken,
    snapshots: watch::Receiver<RunSnapshot>,
    commands: mpsc::Sender<ControlCommand>,
    result: watch::Receiver<Option<Arc<FinalResult>>>,
    created_at: DateTime<Utc>,
}

impl SessionHandle {
    fn finished(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// 当前暂停的序号，未暂停时为 None
    fn current_pause(&self) -> Option<u64> {
        let snapshot = self.snapshots.borrow();
        snapshot.paused_after.map(|_| snapshot.pause_seq)
    }
}

/// 会话管理器
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    semaphore: Arc<Semaphore>,
    session_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent_sessions: usize) -> Self {
        Self {
            orchestrator,
            sessions: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent_sessions.max(1))),
            session_timeout: None,
        }
    }

    pub fn from_config(orchestrator: Arc<Orchestrator>, config: &Config) -> Self {
        let mut manager = Self::new(orchestrator, config.max_concurrent_sessions);
        manager.session_timeout = config.session_timeout_secs.map(Duration::from_secs);
        manager
    }

    /// 会话整体的墙钟上限，超时等同于取消
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// 创建会话并立即开始运行
    pub async fn start_session(&self, request: WorkflowRequest) -> Result<SessionId, SessionError> {
        request.validate().map_err(SessionError::InvalidRequest)?;

        let id = request.id;
        let cancel = CancellationToken::new();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(RunSnapshot::new(WorkflowState::new(&request)));
        let (command_tx, command_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = watch::channel(None);

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                return Err(SessionError::InvalidRequest(
                    WorkflowError::validation(format!("会话 {} 已存在", id)),
                ));
            }
            sessions.insert(
                id,
                SessionHandle {
                    cancel: cancel.clone(),
                    snapshots: snapshot_rx,
                    commands: command_tx,
                    result: result_rx,
                    created_at: Utc::now(),
                },
            );
        }

        let control = RunControl {
            cancel: cancel.clone(),
            snapshots: Some(snapshot_tx),
            commands: Some(command_rx),
        };
        let orchestrator = self.orchestrator.clone();
        let semaphore = self.semaphore.clone();
        let session_timeout = self.session_timeout;

        tokio::spawn(async move {
            // 排队期间被取消：不再等许可，编排器会在第一个边界直接结束
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };

            let timer = session_timeout.map(|timeout| {
                let token = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if !token.is_cancelled() {
                        warn!("[会话 {}] ⏱️ 超过会话时限 {:?}，取消", id.short(), timeout);
                        token.cancel();
                    }
                })
            });

            let result = orchestrator.run_with(request, control).await;

            if let Some(timer) = timer {
                timer.abort();
            }
            drop(permit);
            result_tx.send_replace(Some(Arc::new(result)));
        });

        info!("[会话 {}] 已创建", id.short());
        Ok(id)
    }

    /// 便捷入口：按主题和修订上限创建会话
    pub async fn start(&self, topic: &str, max_revisions: u32) -> Result<SessionId, SessionError> {
        self.start_session(WorkflowRequest::new(topic, max_revisions))
            .await
    }

    pub async fn get_progress(&self, id: SessionId) -> Result<ProgressSnapshot, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        let snapshot = handle.snapshots.borrow();
        Ok(ProgressSnapshot {
            session_id: id,
            status: snapshot.state.status(),
            revision_count: snapshot.state.revision_count(),
            max_revisions: snapshot.state.max_revisions(),
            latest_history_entry: snapshot.state.latest_history_entry().cloned(),
            paused_after: snapshot.paused_after,
        })
    }

    /// 最新的完整状态快照（大纲、证据、草稿、critique、history）
    pub async fn get_state(&self, id: SessionId) -> Result<Arc<WorkflowState>, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        let state = handle.snapshots.borrow().state.clone();
        Ok(state)
    }

    pub async fn get_result(&self, id: SessionId) -> Result<SessionResult, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        let result = match handle.result.borrow().as_ref() {
            Some(result) => SessionResult::Ready(result.clone()),
            None => SessionResult::Pending,
        };
        Ok(result)
    }

    /// 等待会话到达终态
    pub async fn wait_for_result(&self, id: SessionId) -> Result<Arc<FinalResult>, SessionError> {
        let mut rx = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&id)
                .ok_or(SessionError::NotFound(id))?
                .result
                .clone()
        };

        let ready = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SessionError::TaskGone(id))?;
        ready.clone().ok_or(SessionError::TaskGone(id))
    }

    pub async fn cancel(&self, id: SessionId) -> Result<CancelAck, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        if handle.finished() {
            debug!("[会话 {}] 已结束，忽略取消", id.short());
            return Ok(CancelAck::AlreadyFinished);
        }
        handle.cancel.cancel();
        info!("[会话 {}] 收到取消请求", id.short());
        Ok(CancelAck::Requested)
    }

    /// 让暂停中的会话继续
    ///
    /// 只作用于调用时看到的那次暂停；该暂停已被别人结束时返回 `NotPaused`。
    pub async fn resume(&self, id: SessionId) -> Result<(), SessionError> {
        self.send_paused(id, |pause_seq, reply| ControlCommand::Resume { pause_seq, reply })
            .await
    }

    /// 修改暂停中的会话状态，由编排器校验并应用
    pub async fn amend(&self, id: SessionId, amendment: Amendment) -> Result<(), SessionError> {
        self.send_paused(id, |pause_seq, reply| ControlCommand::Amend {
            pause_seq,
            amendment,
            reply,
        })
        .await
    }

    /// 所有会话，按创建时间排序
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, handle)| {
                let snapshot = handle.snapshots.borrow();
                SessionSummary {
                    session_id: *id,
                    topic: snapshot.state.topic().to_string(),
                    status: snapshot.state.status(),
                    paused_after: snapshot.paused_after,
                    finished: handle.finished(),
                    created_at: handle.created_at,
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    /// 移除已结束的会话，返回移除数量
    pub async fn remove_finished(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.finished());
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("清理了 {} 个已结束的会话", removed);
        }
        removed
    }

    /// 把指令绑定到当前这次暂停并等待编排器答复
    async fn send_paused<F>(&self, id: SessionId, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(u64, ControlReply) -> ControlCommand,
    {
        let (commands, pause_seq) = {
            let sessions = self.sessions.read().await;
            let handle = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
            if handle.finished() {
                return Err(SessionError::Finished(id));
            }
            let pause_seq = handle.current_pause().ok_or(SessionError::NotPaused(id))?;
            (handle.commands.clone(), pause_seq)
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(build(pause_seq, reply_tx))
            .await
            .map_err(|_| SessionError::Finished(id))?;

        match reply_rx.await.map_err(|_| SessionError::TaskGone(id))? {
            Ok(()) => Ok(()),
            Err(ControlError::StalePause(_)) => Err(SessionError::NotPaused(id)),
            Err(ControlError::Finished) => Err(SessionError::Finished(id)),
            Err(ControlError::Amendment(source)) => Err(SessionError::AmendmentRejected {
                session: id,
                source,
            }),
        }
    }
}
