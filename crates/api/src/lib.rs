//! 网关HTTP层
//!
//! 接入端点与只读观测视图。所有业务语义都在dispatcher层，
//! 这里只做参数校验、状态码映射与响应包装。

pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};
