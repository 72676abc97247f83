use anyhow::Result as AnyResult;
use async_trait::async_trait;
use relay_application::command_bus::CommandBus;
use relay_application::context::AppContext;
use relay_application::error::AppError;
use relay_application::notifications::{EmailSender, OutgoingEmail, WelcomeEmailConsumer};
use relay_application::query_bus::QueryBus;
use relay_application::users::{
    CreateUser, CreateUserHandler, GetUserByIdentifier, GetUserByIdentifierHandler,
    InMemoryUserRepository, USER_CACHE_QUEUE, UserCacheRefresher, UserDto, UserRecord,
    UserSettingsRecord, UserStatus, WELCOME_USER_EVENT, WELCOME_USER_QUEUE, WelcomeEmailHandler,
};
use relay_application::{InMemoryCommandBus, InMemoryQueryBus};
use relay_domain::cache::{
    CacheCoherencyService, CacheConfig, CacheEntry, CacheKey, CacheStore, InMemoryCache,
};
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::eventing::{
    BatchDispatcher, ClaimService, DispatchConfig, DispatchEngine, DispatchJob,
    InvalidationPublisher, OutboxPublisher, PublisherConfig,
};
use relay_domain::messaging::{InMemoryBroker, NotificationHandler};
use relay_domain::outbox::{JobStatus, RetryPolicy, WorkerId};
use relay_domain::persist::{InMemoryDatabase, InMemoryOutboxRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    down: AtomicBool,
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, email: &OutgoingEmail) -> DomainResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DomainError::transient_delivery("smtp unavailable"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

struct FailingCache;

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &CacheKey) -> DomainResult<Option<CacheEntry>> {
        Err(DomainError::cache_degraded("connection refused"))
    }

    async fn set(&self, _key: &CacheKey, _entry: CacheEntry, _ttl: Option<Duration>) -> DomainResult<()> {
        Err(DomainError::cache_degraded("connection refused"))
    }
}

struct App {
    db: InMemoryDatabase,
    users: Arc<InMemoryUserRepository>,
    outbox: Arc<InMemoryOutboxRepository>,
    cache_store: Arc<InMemoryCache>,
    cache: CacheCoherencyService,
    commands: InMemoryCommandBus,
    queries: InMemoryQueryBus,
    broker: InMemoryBroker,
    sender: Arc<RecordingSender>,
}

impl App {
    /// 内存缓存同时作为检查入口
    fn new() -> AnyResult<Self> {
        let store = Arc::new(InMemoryCache::new());
        let mut app = Self::with_cache_store(store.clone())?;
        app.cache_store = store;
        Ok(app)
    }

    fn with_cache_store(store: Arc<dyn CacheStore>) -> AnyResult<Self> {
        let db = InMemoryDatabase::new();
        let users = Arc::new(InMemoryUserRepository::new(db.clone()));
        let outbox = Arc::new(InMemoryOutboxRepository::new(db.clone()));
        let cache_store = Arc::new(InMemoryCache::new());
        let cache = CacheCoherencyService::new(store, CacheConfig::builder().environment("test").build());

        let commands = InMemoryCommandBus::new();
        commands.register::<CreateUser, _>(Arc::new(CreateUserHandler::new(
            users.clone(),
            outbox.clone(),
        )))?;
        let queries = InMemoryQueryBus::new();
        queries.register::<GetUserByIdentifier, _>(Arc::new(GetUserByIdentifierHandler::new(
            users.clone(),
            cache.clone(),
        )))?;

        let broker = InMemoryBroker::default();
        let sender = Arc::new(RecordingSender::default());
        broker.bind(WELCOME_USER_QUEUE, Arc::new(WelcomeEmailConsumer::new(sender.clone())));

        Ok(Self {
            db,
            users,
            outbox,
            cache_store,
            cache,
            commands,
            queries,
            broker,
            sender,
        })
    }

    async fn create(&self, email: &str, trace: &str) -> Result<String, AppError> {
        let created = self
            .commands
            .dispatch(
                &AppContext::with_trace_id(trace),
                CreateUser {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: email.into(),
                },
            )
            .await?;
        Ok(created.identifier)
    }

    async fn get(&self, identifier: &str) -> Result<UserDto, AppError> {
        self.get_with_status(identifier, UserStatus::Active).await
    }

    async fn get_with_status(&self, identifier: &str, status: UserStatus) -> Result<UserDto, AppError> {
        self.queries
            .dispatch(
                &AppContext::new(),
                GetUserByIdentifier {
                    identifier: identifier.into(),
                    status,
                },
            )
            .await
    }

    fn job(&self) -> AnyResult<DispatchJob<InMemoryOutboxRepository>> {
        let worker = WorkerId::new("worker-1")?;
        let (invalidation, _errors) =
            InvalidationPublisher::new(Arc::new(self.broker.clone()), USER_CACHE_QUEUE);
        let publisher = OutboxPublisher::builder()
            .repo(self.outbox.clone())
            .channel(Arc::new(self.broker.clone()))
            .handler(Arc::new(WelcomeEmailHandler::new(self.users.clone())))
            .worker(worker.clone())
            .invalidation(invalidation)
            .config(
                PublisherConfig::builder()
                    .reply_timeout(Duration::from_millis(500))
                    .retry(RetryPolicy::immediate(5))
                    .build(),
            )
            .build();
        let dispatcher = BatchDispatcher::new(Arc::new(publisher), DispatchConfig::default())?;

        Ok(DispatchJob::builder()
            .event_type(WELCOME_USER_EVENT)
            .worker(worker)
            .claims(ClaimService::new(self.outbox.clone()))
            .dispatcher(dispatcher)
            .build())
    }

    async fn cached_version(&self, key: &CacheKey) -> Option<i64> {
        self.cache_store
            .get(key)
            .await
            .ok()
            .flatten()
            .map(|entry| entry.row_version)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn create_user_writes_rows_and_outbox_together() -> AnyResult<()> {
    let app = App::new()?;
    let id = app.create("ada@example.com", "trace-create").await?;

    let user = app.db.get::<UserRecord>(&id)?.expect("user row");
    assert_eq!(user.version, 1);
    assert_eq!(user.status, UserStatus::Active);
    let settings = app.db.get::<UserSettingsRecord>(&id)?.expect("settings row");
    assert!(!settings.is_welcome_email_sent);

    let records = app.outbox.records()?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.event_type(), WELCOME_USER_EVENT);
    assert_eq!(record.trace_id(), "trace-create");
    assert_eq!(record.job_status(), JobStatus::Pending);
    assert_eq!(record.payload()["identifier"], id.as_str());
    assert_eq!(record.payload()["emailVerificationToken"], settings.email_verification_token.as_str());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_command_writes_nothing() -> AnyResult<()> {
    let app = App::new()?;
    let err = app.create("not-an-email", "trace-bad").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(app.db.all::<UserRecord>()?.is_empty());
    assert!(app.outbox.records()?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn welcome_delivery_flags_settings_and_refreshes_shared_cache() -> AnyResult<()> {
    let app = App::new()?;
    let id = app.create("ada@example.com", "trace-welcome").await?;

    let before = app.get(&id).await?;
    let details = before.details.expect("full projection");
    assert_eq!(details.version, 1);
    assert!(!details.is_welcome_email_sent);

    let refresher: Arc<dyn NotificationHandler> = Arc::new(UserCacheRefresher::new(
        app.users.clone(),
        app.cache.clone(),
    ));
    let engine = Arc::new(
        DispatchEngine::builder()
            .notification_channel(Arc::new(app.broker.clone()))
            .notification_handlers(vec![refresher])
            .build(),
    );
    let handle = engine.start();
    // 等待订阅建立，否则广播会被丢弃
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = app.job()?.run_once().await?;
    assert_eq!(report.succeeded(), 1);

    let record = app.outbox.records()?.remove(0);
    assert_eq!(record.job_status(), JobStatus::Completed);
    assert!(record.is_published());
    let settings = app.db.get::<UserSettingsRecord>(&id)?.expect("settings row");
    assert!(settings.is_welcome_email_sent);
    assert_eq!(app.db.get::<UserRecord>(&id)?.expect("user row").version, 2);

    let sent = app.sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");

    let by_id = app.cache.key("user", &id);
    let client_id = app.db.get::<UserRecord>(&id)?.expect("user row").client_id;
    let by_client = app.cache.key("user-client", &client_id);
    let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if app.cached_version(&by_id).await == Some(2) && app.cached_version(&by_client).await == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "shared cache was not refreshed");

    let after = app.get(&id).await?;
    let details = after.details.expect("full projection");
    assert_eq!(details.version, 2);
    assert!(details.is_welcome_email_sent);

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_send_reverts_record_and_leaves_settings_untouched() -> AnyResult<()> {
    let app = App::new()?;
    let id = app.create("ada@example.com", "trace-down").await?;
    app.sender.down.store(true, Ordering::SeqCst);

    let report = app.job()?.run_once().await?;
    assert_eq!(report.failed(), 1);

    let record = app.outbox.records()?.remove(0);
    assert_eq!(record.job_status(), JobStatus::Pending);
    assert!(!record.is_published());
    assert_eq!(record.attempts(), 1);
    assert!(record.locked_by().is_none());
    let settings = app.db.get::<UserSettingsRecord>(&id)?.expect("settings row");
    assert!(!settings.is_welcome_email_sent);
    assert_eq!(app.db.get::<UserRecord>(&id)?.expect("user row").version, 1);

    // 恢复后下一轮投递成功
    app.sender.down.store(false, Ordering::SeqCst);
    let report = app.job()?.run_once().await?;
    assert_eq!(report.succeeded(), 1);
    assert_eq!(app.outbox.records()?[0].job_status(), JobStatus::Completed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn external_update_is_never_served_stale() -> AnyResult<()> {
    let app = App::new()?;
    let id = app.create("ada@example.com", "trace-stale").await?;
    assert_eq!(app.get(&id).await?.details.expect("details").first_name, "Ada");

    let mut user = app.db.get::<UserRecord>(&id)?.expect("user row");
    user.first_name = "Augusta".into();
    let mut tx = app.db.begin()?;
    tx.update(&user)?;
    tx.commit()?;

    let details = app.get(&id).await?.details.expect("details");
    assert_eq!(details.first_name, "Augusta");
    assert_eq!(details.version, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn degraded_cache_serves_minimal_projection() -> AnyResult<()> {
    let app = App::with_cache_store(Arc::new(FailingCache))?;
    let id = app.create("ada@example.com", "trace-degraded").await?;

    let dto = app.get(&id).await?;
    assert_eq!(dto, UserDto::minimal(id, UserStatus::Active));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn status_filter_holds_with_warm_cache() -> AnyResult<()> {
    let app = App::new()?;
    let id = app.create("ada@example.com", "trace-status").await?;

    let cold = app.get_with_status(&id, UserStatus::Inactive).await.unwrap_err();
    assert!(matches!(cold, AppError::NotFound(_)));

    app.get(&id).await?;
    let key = app.cache.key("user", &id);
    assert_eq!(app.cached_version(&key).await, Some(1));

    let warm = app.get_with_status(&id, UserStatus::Inactive).await.unwrap_err();
    assert!(matches!(warm, AppError::NotFound(_)));
    assert_eq!(app.get(&id).await?.status, UserStatus::Active);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_user_is_not_found() -> AnyResult<()> {
    let app = App::new()?;
    let err = app.get("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}
