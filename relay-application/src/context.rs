use uuid::Uuid;

/// 应用层上下文（Application Context）
///
/// 承载一次命令/查询调用的横切信息：
/// - `trace_id`：链路追踪标识，命令写入的 outbox 记录沿用它，贯穿投递与缓存刷新；
/// - `idempotency_key`：可选幂等键，由上层或基础设施决定是否参与幂等。
///
/// ```rust
/// use relay_application::context::AppContext;
///
/// let ctx = AppContext::with_trace_id("trace-123").idempotency_key("idem-xyz");
/// assert_eq!(ctx.trace_id, "trace-123");
/// ```
#[derive(Clone, Debug)]
pub struct AppContext {
    pub trace_id: String,
    pub idempotency_key: Option<String>,
}

impl AppContext {
    /// 以新生成的 trace id 构造上下文
    pub fn new() -> Self {
        Self::with_trace_id(Uuid::new_v4().to_string())
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            idempotency_key: None,
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}
