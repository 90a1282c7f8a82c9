//! 优雅关闭
//!
//! 关闭分两段：先停止接收新工作（执行器每轮迭代前检查 [`ShutdownManager::is_shutdown`]，
//! 正在进行的运行在当前步骤结束后以 `ShuttingDown` 返回），再按注册顺序执行清理任务。
//! [`run_with_graceful_shutdown`] 收到信号后仍然等待运行自行停下，不会直接丢弃它，
//! 保证已经写出的会话事件在 flush 之前落盘。

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::session::SessionStorage;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号：可克隆，所有克隆共享同一个 token 与原因
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            reason_tx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；只有第一次调用的原因生效并被广播
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason.clone()).is_err() {
            return;
        }
        tracing::info!(reason = ?reason, "shutdown initiated");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 后台监听 Ctrl+C 与 SIGTERM，任一到达即触发关闭
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Some(reason) = next_signal().await {
                tracing::info!(reason = ?reason, "signal received, stopping after the current step");
                manager.shutdown(reason);
            }
        });
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn next_signal() -> Option<ShutdownReason> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            return tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|()| ShutdownReason::UserInitiated);
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.ok().map(|()| ShutdownReason::UserInitiated),
        _ = sigterm.recv() => Some(ShutdownReason::Signal),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> Option<ShutdownReason> {
    tokio::signal::ctrl_c()
        .await
        .ok()
        .map(|()| ShutdownReason::UserInitiated)
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 用于日志
    fn name(&self) -> &'static str;
}

/// 清理结果：失败或超时的任务名
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

/// 清理协调器：持有关闭信号与清理任务
pub struct ShutdownCoordinator {
    manager: ShutdownManager,
    tasks: Vec<Arc<dyn ShutdownCleanup>>,
    task_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: ShutdownManager) -> Self {
        Self {
            manager,
            tasks: Vec::new(),
            task_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    pub fn manager(&self) -> &ShutdownManager {
        &self.manager
    }

    /// 依次执行清理任务；单个任务失败或超时只记日志，不影响后续任务
    pub async fn run_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for task in &self.tasks {
            let name = task.name();
            let failure = match tokio::time::timeout(self.task_timeout, task.cleanup()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(_) => Some(format!("timed out after {:?}", self.task_timeout)),
            };
            match failure {
                None => {
                    tracing::debug!(task = name, "cleanup completed");
                    report.completed.push(name);
                }
                Some(error) => {
                    tracing::warn!(task = name, error = %error, "cleanup failed");
                    report.failed.push(name);
                }
            }
        }
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "cleanup finished"
        );
        report
    }
}

/// 关闭前把会话存储的缓冲写出
pub struct StorageFlush {
    storage: Arc<dyn SessionStorage>,
}

impl StorageFlush {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for StorageFlush {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.storage.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "session_storage"
    }
}

/// 安装信号处理器后运行 `run`，结束后执行清理
///
/// 收到关闭信号时不取消 `run`：执行器会在当前步骤结束后自行返回 `ShuttingDown`，
/// 这里继续等它返回，再执行清理，所以返回值总是 `run` 的输出。
pub async fn run_with_graceful_shutdown<Fut>(coordinator: &ShutdownCoordinator, run: Fut) -> Fut::Output
where
    Fut: Future,
{
    let manager = coordinator.manager();
    manager.install_signal_handlers();

    tokio::pin!(run);
    let output = tokio::select! {
        out = &mut run => out,
        _ = manager.wait_for_shutdown() => {
            tracing::info!("waiting for the in-flight run to stop");
            run.await
        }
    };

    coordinator.run_cleanup().await;
    output
}
