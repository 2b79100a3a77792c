pub mod context;
pub mod llm;

pub use context::{ContextMessage, ConversationContext};
pub use llm::OpenAiAnalyzer;
