//! Tool invocation pipeline.

pub mod content;
pub mod invoker;

pub use content::{ContentBlock, ToolResponse};
pub use invoker::{Invoker, ToolDispatch};
