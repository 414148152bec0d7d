//! 探测历史模块
//!
//! 提供按目标的有界历史存储和统计汇总

pub mod stats;
pub mod store;

// 重新导出主要类型
pub use stats::HistoryStats;
pub use store::{HistoryLog, HistoryStore, MemoryHistoryStore};

/// 每个目标默认保留的历史条数
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// 查询未指定数量时返回的条数
pub const DEFAULT_QUERY_LIMIT: usize = 50;
