//! 业务能力层（Capabilities）
//!
//! 描述"我能做什么"：文本生成、网页检索、结果保存。
//! 不关心流程顺序，也不持有任何会话状态，可被多个会话并发共享。

pub mod generation;
pub mod result_writer;
pub mod retry;
pub mod search;

pub use generation::TextGenerator;
pub use result_writer::{JsonResultWriter, ResultSink};
pub use retry::{call_with_retry, RetryPolicy};
pub use search::{SearchHit, WebSearch};
