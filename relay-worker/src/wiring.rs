use crate::config::WorkerConfig;
use anyhow::Result;
use relay_application::InMemoryCommandBus;
use relay_application::notifications::{LogEmailSender, WelcomeEmailConsumer};
use relay_application::users::{
    CreateUser, CreateUserHandler, USER_CACHE_QUEUE, UserCacheRefresher, UserRepository,
    WELCOME_USER_EVENT, WELCOME_USER_QUEUE, WelcomeEmailHandler,
};
use relay_domain::cache::{CacheCoherencyService, CacheConfig, InMemoryCache};
use relay_domain::eventing::{
    BatchDispatcher, ClaimService, DispatchConfig, DispatchCycle, DispatchEngine,
    DispatchEngineConfig, DispatchJob, InvalidationFailure, InvalidationPublisher,
    OutboxPublisher, PublisherConfig,
};
use relay_domain::messaging::{InMemoryBroker, NotificationHandler};
use relay_domain::outbox::{OutboxRepository, RetryPolicy, WorkerId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 组装完成、尚未启动的中继
pub struct Relay {
    pub engine: Arc<DispatchEngine>,
    pub commands: InMemoryCommandBus,
    pub invalidation_failures: mpsc::UnboundedReceiver<InvalidationFailure>,
}

/// 将仓储、代理与缓存装配为调度引擎与命令总线
///
/// 消息代理与缓存使用进程内实现；`outbox` 与 `users` 必须共享同一种事务。
pub fn assemble<R, U>(
    config: &WorkerConfig,
    worker: WorkerId,
    outbox: Arc<R>,
    users: Arc<U>,
) -> Result<Relay>
where
    R: OutboxRepository + 'static,
    U: UserRepository<Tx = R::Tx> + 'static,
{
    let broker = InMemoryBroker::default();
    broker.bind(
        WELCOME_USER_QUEUE,
        Arc::new(WelcomeEmailConsumer::new(Arc::new(LogEmailSender))),
    );

    let cache = CacheCoherencyService::new(
        Arc::new(InMemoryCache::new()),
        CacheConfig::builder()
            .environment(config.environment.clone())
            .maybe_ttl(config.cache_ttl)
            .build(),
    );

    let commands = InMemoryCommandBus::new();
    commands.register::<CreateUser, _>(Arc::new(CreateUserHandler::new(
        users.clone(),
        outbox.clone(),
    )))?;

    let (invalidation, invalidation_failures) =
        InvalidationPublisher::new(Arc::new(broker.clone()), USER_CACHE_QUEUE);
    let publisher = OutboxPublisher::builder()
        .repo(outbox.clone())
        .channel(Arc::new(broker.clone()))
        .handler(Arc::new(WelcomeEmailHandler::new(users.clone())))
        .worker(worker.clone())
        .invalidation(invalidation)
        .config(
            PublisherConfig::builder()
                .reply_timeout(config.reply_timeout)
                .retry(RetryPolicy::builder().max_attempts(config.max_attempts).build())
                .build(),
        )
        .build();
    let dispatcher = BatchDispatcher::new(
        Arc::new(publisher),
        DispatchConfig::builder()
            .batch_size(config.dispatch_batch_size)
            .concurrency(config.dispatch_concurrency)
            .build(),
    )?;
    let job = DispatchJob::builder()
        .event_type(WELCOME_USER_EVENT)
        .worker(worker)
        .claims(ClaimService::new(outbox))
        .dispatcher(dispatcher)
        .claim_batch_size(config.claim_batch_size)
        .build();

    let refresher = UserCacheRefresher::new(users, cache);
    let engine = DispatchEngine::builder()
        .jobs(vec![Arc::new(job) as Arc<dyn DispatchCycle>])
        .notification_channel(Arc::new(broker))
        .notification_handlers(vec![Arc::new(refresher) as Arc<dyn NotificationHandler>])
        .config(
            DispatchEngineConfig::builder()
                .poll_interval(config.poll_interval)
                .build(),
        )
        .build();

    Ok(Relay {
        engine: Arc::new(engine),
        commands,
        invalidation_failures,
    })
}
