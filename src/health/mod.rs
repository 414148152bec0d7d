//! 健康检测模块
//!
//! 提供目标定义、HTTP探测、结果分类和按目标调度功能

pub mod prober;
pub mod result;
pub mod scheduler;
pub mod target;

// 重新导出主要类型
pub use prober::{HttpProber, Prober};
pub use result::{classify, ProbeResult, ProbeState};
pub use scheduler::{Scheduler, SchedulingState};
pub use target::{Target, TargetId};
