//! 聊天中继核心领域模型
//!
//! 包含聊天事件、事件类型以及相关的校验规则。

pub mod chat_event;
pub mod errors;
pub mod value_objects;

// 重新导出常用类型
pub use chat_event::*;
pub use errors::*;
pub use value_objects::*;
