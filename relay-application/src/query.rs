use crate::dto::Dto;

/// 应用层查询（Query）
///
/// 表达只读意图，不改变领域状态；结果为关联的 [`Dto`](crate::dto::Dto)。
/// 读路径可以经由缓存一致性服务，而不是直连主存储。
pub trait Query: Send + Sync + 'static {
    /// 查询的稳定名称
    const NAME: &'static str;

    type Dto: Dto;
}
