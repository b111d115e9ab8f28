//! Web API 层。
//!
//! 提供 Axum 路由：实时 WebSocket 网关、轮询接口和管理端统计，
//! 将请求委托给应用层的分发服务。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::{AppState, GatewaySettings};
pub use ws_connection::LiveConnection;
