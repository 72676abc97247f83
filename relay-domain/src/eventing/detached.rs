use std::fmt::Display;
use std::future::Future;
use tokio::sync::mpsc;

/// 启动一个不被等待的后台任务
///
/// 任务失败时记录 warn 日志并把错误送入 `errors`；接收端已关闭时仅记录日志。
/// 调用方不持有任务句柄，因此无法也不应 join。
pub fn spawn_detached<F, E>(task: &'static str, errors: mpsc::UnboundedSender<E>, fut: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            tracing::warn!(task, error = %err, "detached task failed");
            let _ = errors.send(err);
        }
    });
}
