//! 模型解析模块：将 (提供商, 模型, 上下文) 解析为可复用的模型句柄。
//!
//! # Model Resolution
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ModelSpec`] | Normalized request for a binding |
//! | [`ModelHandle`] | Immutable, shared binding plus provenance |
//! | [`HandleFactory`] | Caller-supplied constructor for provider bindings |
//! | [`ModelResolver`] | TTL cache of handles with per-key build locks |

pub mod handle;
pub mod resolver;

pub use handle::{HandleFactory, ModelHandle, ModelSpec};
pub use resolver::{ModelResolver, ResolverConfig, ResolverMetrics};
