//! Repository 実装
//!
//! - `inmemory`: プロセス内で完結する実装（単一ノード構成）

pub mod inmemory;

pub use inmemory::{InMemoryConnectionRepository, InMemoryDeliveryRepository};
