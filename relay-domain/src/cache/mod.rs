//! 缓存一致性（cache）
//!
//! - `CacheStore`/`InMemoryCache`：键值缓存协议及内存实现；
//! - `CacheCoherencyService`：以行版本校验新鲜度的旁路缓存读路径；
//! - `CacheRead`：显式区分命中、刷新与降级兜底的读结果。
//!
mod coherency;
mod store;

pub use coherency::{CacheCoherencyService, CacheConfig, CacheRead, Versioned, VersionedSource};
pub use store::{CacheEntry, CacheKey, CacheStore, InMemoryCache};
