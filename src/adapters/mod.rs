pub mod anthropic;
pub mod llm;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAIAdapter;
