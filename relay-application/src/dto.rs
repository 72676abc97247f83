use serde::Serialize;

/// 数据传输对象（DTO）
///
/// 应用层的输出载体，序列化友好，与存储行结构解耦。
pub trait Dto: Serialize + Send + Sync + 'static {}
