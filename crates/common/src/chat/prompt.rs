//! Prompt assembly

use super::Message;
use crate::errors::Result;
use crate::llm::{ChatMessage, Role};
use crate::vectorstore::Document;

/// Lead-in of the synthesized context message
pub const CONTEXT_PREAMBLE: &str = "Use the following context to answer the user's question. \
If the context is not relevant, say so and answer based on your own knowledge.\n\nContext:\n";

pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Content of the most recent user turn, or empty text when there is none
pub fn retrieval_query(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User.as_str())
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Conversation with the retrieved context prepended as a system message
pub fn build_prompt(messages: &[Message], context: &[Document]) -> Result<Vec<ChatMessage>> {
    let mut prompt = Vec::with_capacity(messages.len() + 1);

    if !context.is_empty() {
        let joined = context
            .iter()
            .map(|doc| doc.page_content.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR);
        prompt.push(ChatMessage::system(format!("{}{}", CONTEXT_PREAMBLE, joined)));
    }

    for message in messages {
        let role: Role = message.role.parse()?;
        prompt.push(ChatMessage::new(role, message.content.clone()));
    }

    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::vectorstore::Metadata;

    #[test]
    fn test_query_is_last_user_turn() {
        let messages = vec![
            Message::new("user", "first"),
            Message::new("assistant", "answer"),
            Message::new("user", "second"),
            Message::new("assistant", "another"),
        ];
        assert_eq!(retrieval_query(&messages), "second");
        assert_eq!(retrieval_query(&[Message::new("system", "only")]), "");
    }

    #[test]
    fn test_prompt_without_context_is_unchanged() {
        let messages = vec![Message::new("system", "be brief"), Message::new("user", "hi")];
        let prompt = build_prompt(&messages, &[]).unwrap();
        assert_eq!(
            prompt,
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]
        );
    }

    #[test]
    fn test_context_message_prepended() {
        let context = vec![
            Document::new("alpha", Metadata::new()),
            Document::new("beta", Metadata::new()),
        ];
        let prompt = build_prompt(&[Message::new("user", "q")], &context).unwrap();

        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt[0].content.starts_with("Use the following context"));
        assert!(prompt[0].content.ends_with("Context:\nalpha\n\n---\n\nbeta"));
        assert_eq!(prompt[1], ChatMessage::user("q"));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = build_prompt(&[Message::new("tool", "x")], &[]);
        assert!(matches!(result, Err(AppError::InvalidRequest { .. })));
    }
}
