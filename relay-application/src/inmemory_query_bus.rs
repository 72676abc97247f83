use crate::{
    context::AppContext, error::AppError, query::Query, query_bus::QueryBus,
    query_handler::QueryHandler,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type QueryHandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send + 'a>>;

type QueryHandlerFn =
    Arc<dyn for<'a> Fn(BoxAnySend, &'a AppContext) -> QueryHandlerFuture<'a> + Send + Sync>;

fn erase<F>(f: F) -> QueryHandlerFn
where
    F: for<'a> Fn(BoxAnySend, &'a AppContext) -> QueryHandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 基于内存的 QueryBus 实现
/// - 通过 TypeId 注册不同 Query 对应的 Handler（查询类型决定其 DTO，一对一）
/// - 以类型擦除方式调度，并在调用端还原 `Q::Dto`
#[derive(Default)]
pub struct InMemoryQueryBus {
    handlers: DashMap<TypeId, (&'static str, QueryHandlerFn)>,
}

impl InMemoryQueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册查询处理器；重复注册返回 `AlreadyRegisteredQuery`
    pub fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let key = TypeId::of::<Q>();
        if self.handlers.contains_key(&key) {
            return Err(AppError::AlreadyRegisteredQuery { query: Q::NAME });
        }

        let f = erase(move |boxed_q, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                match boxed_q.downcast::<Q>() {
                    Ok(q) => {
                        let dto = handler.handle(ctx, *q).await?;
                        Ok(Box::new(dto) as BoxAnySend)
                    }
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: Q::NAME,
                        found: "unknown",
                    }),
                }
            })
        });

        self.handlers.insert(key, (Q::NAME, f));
        Ok(())
    }

    /// 已注册的查询名列表（只读视图）
    pub fn registered_queries(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|e| e.value().0).collect()
    }
}

#[async_trait]
impl QueryBus for InMemoryQueryBus {
    async fn dispatch<Q: Query>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError> {
        let Some(f) = self.handlers.get(&TypeId::of::<Q>()).map(|h| h.value().1.clone()) else {
            return Err(AppError::HandlerNotFound(Q::NAME));
        };

        let out = (f)(Box::new(q), ctx).await?;

        match out.downcast::<Q::Dto>() {
            Ok(dto) => Ok(*dto),
            Err(_) => Err(AppError::TypeMismatch {
                expected: type_name::<Q::Dto>(),
                found: "unknown",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::Dto;
    use serde::Serialize;
    use std::collections::HashMap;
    use tokio::task::JoinSet;

    struct StatusOf {
        identifier: String,
    }

    impl Query for StatusOf {
        const NAME: &'static str = "status-of";
        type Dto = StatusDto;
    }

    #[derive(Debug, Serialize, PartialEq)]
    struct StatusDto {
        status: &'static str,
    }

    impl Dto for StatusDto {}

    struct StatusDirectory(HashMap<&'static str, &'static str>);

    impl StatusDirectory {
        fn seeded() -> Arc<Self> {
            Arc::new(Self(HashMap::from([("u-1", "ACTIVE"), ("u-2", "INACTIVE")])))
        }
    }

    #[async_trait]
    impl QueryHandler<StatusOf> for StatusDirectory {
        async fn handle(&self, _ctx: &AppContext, q: StatusOf) -> Result<StatusDto, AppError> {
            self.0
                .get(q.identifier.as_str())
                .map(|status| StatusDto { status: *status })
                .ok_or_else(|| AppError::not_found(q.identifier))
        }
    }

    fn status_of(identifier: &str) -> StatusOf {
        StatusOf {
            identifier: identifier.to_string(),
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_registered_handler() {
        let bus = InMemoryQueryBus::new();
        bus.register::<StatusOf, _>(StatusDirectory::seeded()).unwrap();

        let ctx = AppContext::default();
        let dto = bus.dispatch(&ctx, status_of("u-2")).await.unwrap();
        assert_eq!(dto, StatusDto { status: "INACTIVE" });

        let err = bus.dispatch(&ctx, status_of("u-9")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(bus.registered_queries(), vec!["status-of"]);
    }

    #[tokio::test]
    async fn unregistered_query_has_no_handler() {
        let bus = InMemoryQueryBus::new();
        let err = bus
            .dispatch(&AppContext::default(), status_of("u-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HandlerNotFound("status-of")));
    }

    #[tokio::test]
    async fn second_registration_for_same_query_fails() {
        let bus = InMemoryQueryBus::new();
        let directory = StatusDirectory::seeded();
        bus.register::<StatusOf, _>(directory.clone()).unwrap();
        let err = bus.register::<StatusOf, _>(directory).unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyRegisteredQuery { query: "status-of" }
        ));
    }

    #[tokio::test]
    async fn foreign_result_type_is_reported() {
        let bus = InMemoryQueryBus::new();
        // 键为 StatusOf，返回值却是 String
        let f = erase(|_q, _ctx| {
            Box::pin(async move { Ok(Box::new("oops".to_string()) as BoxAnySend) })
        });
        bus.handlers.insert(TypeId::of::<StatusOf>(), (StatusOf::NAME, f));

        let err = bus
            .dispatch(&AppContext::default(), status_of("u-1"))
            .await
            .unwrap_err();
        match err {
            AppError::TypeMismatch { expected, found } => {
                assert!(expected.contains("StatusDto"));
                assert!(!found.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct Echo;

    impl Query for Echo {
        const NAME: &'static str = "echo";
        type Dto = TraceDto;
    }

    #[derive(Debug, Serialize)]
    struct TraceDto(String);

    impl Dto for TraceDto {}

    struct EchoHandler;

    #[async_trait]
    impl QueryHandler<Echo> for EchoHandler {
        async fn handle(&self, ctx: &AppContext, _q: Echo) -> Result<TraceDto, AppError> {
            Ok(TraceDto(ctx.trace_id.clone()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn context_reaches_each_handler_under_concurrency() {
        let bus = Arc::new(InMemoryQueryBus::new());
        bus.register::<Echo, _>(Arc::new(EchoHandler)).unwrap();
        bus.register::<StatusOf, _>(StatusDirectory::seeded()).unwrap();

        let mut set = JoinSet::new();
        for i in 0..32 {
            let bus = bus.clone();
            set.spawn(async move {
                let ctx = AppContext::with_trace_id(format!("trace-{i}"));
                let TraceDto(seen) = bus.dispatch(&ctx, Echo).await.unwrap();
                assert_eq!(seen, ctx.trace_id);
            });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap();
        }

        let mut names = bus.registered_queries();
        names.sort_unstable();
        assert_eq!(names, vec!["echo", "status-of"]);
    }
}
