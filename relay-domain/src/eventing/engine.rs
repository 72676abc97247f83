//! 调度引擎（DispatchEngine）
//!
//! 统一编排“认领 → 批量投递”与“订阅通知 → 分发处理”的长驻任务：
//! - 每个 `DispatchJob` 一个周期任务，错过的 tick 直接跳过；
//! - 订阅通知通道，按通道匹配处理器并发执行，失败仅记录日志；
//! - 提供关闭与等待的 `EngineHandle`，关闭时进行中的一轮会完成，不再开始新的一轮。
//!
use super::claim::ClaimService;
use super::dispatcher::{BatchDispatcher, BatchReport};
use crate::error::DomainResult;
use crate::messaging::{NotificationChannel, NotificationHandler};
use crate::outbox::{OutboxRepository, WorkerId};
use async_trait::async_trait;
use bon::Builder;
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 单个事件类型的一轮“认领 + 投递”
#[async_trait]
pub trait DispatchCycle: Send + Sync {
    fn event_type(&self) -> &str;

    async fn run_once(&self) -> DomainResult<BatchReport>;
}

#[derive(Builder)]
pub struct DispatchJob<R: OutboxRepository> {
    #[builder(into)]
    event_type: String,
    worker: WorkerId,
    claims: ClaimService<R>,
    dispatcher: BatchDispatcher,
    /// 每轮认领的上限
    #[builder(default = 12)]
    claim_batch_size: usize,
    /// Processing 锁的超时，超时后视为持有者已崩溃
    #[builder(default = Duration::from_secs(300))]
    lock_timeout: Duration,
}

impl<R: OutboxRepository> DispatchJob<R> {
    /// 执行一轮；认领失败时整轮中止，未认领任何记录
    pub async fn run_once(&self) -> DomainResult<BatchReport> {
        let claimed = self
            .claims
            .claim(
                &self.event_type,
                &self.worker,
                self.claim_batch_size,
                self.lock_timeout,
            )
            .await?;

        if claimed.is_empty() {
            tracing::trace!(event_type = %self.event_type, "nothing to dispatch");
            return Ok(BatchReport::default());
        }

        tracing::debug!(
            event_type = %self.event_type,
            worker = %self.worker,
            claimed = claimed.len(),
            "dispatch cycle started"
        );
        let report = self.dispatcher.dispatch(claimed).await;
        tracing::info!(
            event_type = %self.event_type,
            delivered = report.succeeded(),
            failed = report.failed(),
            "dispatch cycle finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl<R: OutboxRepository + 'static> DispatchCycle for DispatchJob<R> {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn run_once(&self) -> DomainResult<BatchReport> {
        DispatchJob::run_once(self).await
    }
}

/// 调度引擎配置
#[derive(Clone, Copy, Debug, Builder)]
pub struct DispatchEngineConfig {
    /// 轮询间隔
    #[builder(default = Duration::from_secs(20))]
    pub poll_interval: Duration,
    /// 单条通知的处理并发（同一通知分发给多个处理器）
    #[builder(default = 8)]
    pub handler_concurrency: usize,
}

impl Default for DispatchEngineConfig {
    fn default() -> Self {
        DispatchEngineConfig::builder().build()
    }
}

#[derive(Builder)]
pub struct DispatchEngine {
    #[builder(default)]
    jobs: Vec<Arc<dyn DispatchCycle>>,
    notification_channel: Option<Arc<dyn NotificationChannel>>,
    #[builder(default)]
    notification_handlers: Vec<Arc<dyn NotificationHandler>>,
    #[builder(default)]
    config: DispatchEngineConfig,
}

impl DispatchEngine {
    /// 启动调度引擎，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(self.jobs.len() + 1);

        for job in &self.jobs {
            let job = job.clone();
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.poll_interval,
                move || {
                    let job = job.clone();
                    async move {
                        // 认领失败：本轮无任何记录被认领，下一轮自然重试
                        if let Err(err) = job.run_once().await {
                            tracing::error!(
                                event_type = %job.event_type(),
                                error = %err,
                                "dispatch cycle aborted"
                            );
                        }
                    }
                },
            ));
        }

        if let Some(channel) = self.notification_channel.clone() {
            let registry = HandlerRegistry::new(self.notification_handlers.clone());
            for name in registry.channels() {
                tasks.push(tokio::spawn(Self::subscribe_loop(
                    channel.clone(),
                    name,
                    registry.clone(),
                    self.config.handler_concurrency,
                    token.clone(),
                )));
            }
        }

        EngineHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn subscribe_loop(
        channel: Arc<dyn NotificationChannel>,
        name: String,
        registry: HandlerRegistry,
        concurrency: usize,
        token: CancellationToken,
    ) {
        let mut stream = channel.subscribe(&name).await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    break;
                }
                maybe_message = stream.next() => {
                    match maybe_message {
                        Some(Ok(message)) => {
                            let handlers = registry.matching(&name);
                            stream::iter(handlers)
                                .for_each_concurrent(Some(concurrency.max(1)), |h| {
                                    let message = &message;
                                    async move {
                                        if let Err(err) = h.handle(message).await {
                                            tracing::warn!(
                                                handler = h.handler_name(),
                                                trace_id = %message.trace_id(),
                                                error = %err,
                                                "notification handler failed"
                                            );
                                        }
                                    }
                                })
                                .await;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(channel = %name, error = %err, "notification stream lagged");
                        }
                        None => {
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Clone, Default)]
struct HandlerRegistry {
    by_channel: HashMap<String, Vec<Arc<dyn NotificationHandler>>>,
}

impl HandlerRegistry {
    fn new(handlers: Vec<Arc<dyn NotificationHandler>>) -> Self {
        let mut by_channel: HashMap<String, Vec<Arc<dyn NotificationHandler>>> = HashMap::new();
        for h in handlers {
            by_channel.entry(h.channel().to_string()).or_default().push(h);
        }
        Self { by_channel }
    }

    fn channels(&self) -> Vec<String> {
        self.by_channel.keys().cloned().collect()
    }

    fn matching(&self, channel: &str) -> Vec<Arc<dyn NotificationHandler>> {
        self.by_channel.get(channel).cloned().unwrap_or_default()
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
