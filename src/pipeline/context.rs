//! # Conversation Context
//!
//! Ordered message history plus the system prompt for one session.
//!
//! ## Rules:
//! - Messages are append-only; the only removal is [`ConversationContext::clear`]
//! - Roles arriving as text go through [`Role::from_str`], which rejects anything but
//!   `user` / `assistant` with [`InvalidRoleError`]
//! - The system prompt is never stored as a message; it is prepended at render time
//! - One context belongs to exactly one agent and is never shared between sessions

use crate::error::InvalidRoleError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant. Keep responses concise and conversational.";

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = InvalidRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(InvalidRoleError::new(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One entry of the list handed to a response generator.
///
/// Unlike [`Message`] the role is free-form, because rendering may add a `system` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    messages: Vec<Message>,
    system_prompt: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: system_prompt.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
    }

    /// Produce the exact sequence for a generation call.
    ///
    /// With `include_system` and a non-empty prompt, the prompt comes first as a
    /// `system` entry.
    pub fn render(&self, include_system: bool) -> Vec<RenderedMessage> {
        let mut rendered = Vec::with_capacity(self.messages.len() + 1);

        if include_system && !self.system_prompt.is_empty() {
            rendered.push(RenderedMessage {
                role: "system".to_string(),
                content: self.system_prompt.clone(),
            });
        }

        rendered.extend(self.messages.iter().map(|msg| RenderedMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }));

        rendered
    }

    /// Drop the history. Prompt and metadata stay.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> ConversationContext {
        let mut ctx = ConversationContext::new("be brief");
        ctx.add_message(Role::User, "hello");
        ctx.add_message(Role::Assistant, "hi there");
        ctx
    }

    #[test]
    fn test_render_prepends_system_prompt() {
        let ctx = sample_context();
        let rendered = ctx.render(true);

        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].role, "system");
        assert_eq!(rendered[0].content, "be brief");
        assert_eq!(rendered[1].role, "user");
        assert_eq!(rendered[2].content, "hi there");
        // prompt is never stored as a message
        assert_eq!(ctx.messages().len(), 2);
    }

    #[test]
    fn test_render_without_system() {
        let ctx = sample_context();
        let rendered = ctx.render(false);
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].role, "user");
    }

    #[test]
    fn test_empty_prompt_is_omitted() {
        let mut ctx = ConversationContext::new("");
        ctx.add_message(Role::User, "ping");
        assert_eq!(ctx.render(true).len(), 1);
    }

    #[test]
    fn test_invalid_role_rejected() {
        let err = "system".parse::<Role>().unwrap_err();
        assert_eq!(err.role, "system");
        assert!("".parse::<Role>().is_err());
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);

        let mut ctx = ConversationContext::default();
        ctx.add_message("user".parse().unwrap(), "hi");
        assert_eq!(ctx.messages()[0].role, Role::User);
    }

    #[test]
    fn test_clear_keeps_prompt_and_metadata() {
        let mut ctx = sample_context();
        ctx.metadata.insert("lang".to_string(), serde_json::json!("en"));
        ctx.clear();

        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.system_prompt(), "be brief");
        assert_eq!(ctx.metadata.len(), 1);

        let rendered = ctx.render(true);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].content, "be brief");
    }

    #[test]
    fn test_new_prompt_applies_to_next_render() {
        let mut ctx = sample_context();
        ctx.set_system_prompt("speak like a pirate");

        let rendered = ctx.render(true);
        assert_eq!(rendered[0].content, "speak like a pirate");
        assert_eq!(ctx.messages().len(), 2);
    }

    #[test]
    fn test_render_is_idempotent() {
        let ctx = sample_context();
        assert_eq!(ctx.render(true), ctx.render(true));
    }
}
