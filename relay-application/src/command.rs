/// 应用层命令（Command）
///
/// 表达“意图”的写操作请求，会修改领域状态并可能写入 outbox。
/// - 命名采用“动宾结构”，如 `CreateUser`；
/// - `Output` 只承载执行结果（如新建聚合的标识），不返回读模型。
pub trait Command: Send + Sync + 'static {
    /// 命令的稳定名称，用于日志、追踪与路由
    const NAME: &'static str;

    type Output: Send + 'static;
}
