//! Worker运行时
//!
//! 消费调度队列并执行调度任务。单个进程内的在途调度数由信号量约束，
//! 重试晋升与在途任务回收作为伴生循环运行。worker自身从不为重试睡眠。

pub mod service;

pub use service::{WorkerService, WorkerSettings};
