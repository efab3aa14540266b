//! Response generation engines.

pub mod openai;

pub use openai::{ChatCompletionsGenerator, ChatProvider};
