//! 短信网关领域层
//!
//! 核心实体、消息与端口定义。这些类型是系统的业务模型，
//! 不依赖于具体的存储或网络实现。

pub mod entities;
pub mod kv;
pub mod messaging;
pub mod ports;
pub mod repositories;

pub use entities::{
    Attempt, AttemptStatus, DeadLetter, DeadLetterReason, Provider, RequestFilter, RequestStatus,
    SmsRequest,
};
pub use kv::{parse_count, KvStore};
pub use messaging::{DispatchTask, TaskEnvelope, TaskQueue};
pub use ports::{ProviderClient, ProviderResponse};
pub use repositories::{
    AttemptRepository, DeadLetterRepository, RequestStats, SmsRequestRepository,
};
