//! 能力接口的具体实现
//!
//! - `llm_client` - OpenAI 兼容的文本生成（async-openai）
//! - `search_client` - Tavily 兼容的网页检索（reqwest）

pub mod llm_client;
pub mod search_client;

pub use llm_client::LlmClient;
pub use search_client::SearchClient;
