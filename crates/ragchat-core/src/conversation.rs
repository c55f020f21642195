//! Conversation history and grounded prompt assembly.
//!
//! [`ConversationHistory`] keeps the most recent `max_turns` exchanges and
//! evicts the oldest first. [`assemble_prompt`] combines retrieved chunks,
//! prior turns, and the user's question into the system and user messages
//! sent to the chat model.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::models::{ConversationTurn, RetrievalResult, Role};

/// Default history cap, in turns (a question and its answer are two turns).
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Bounded, FIFO-evicting conversation history.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    /// `max_turns` is clamped to at least one.
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns,
        }
    }

    /// Append a turn, evicting the oldest turns once over capacity.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(ConversationTurn::new(role, content));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Role-labeled transcript, one line per turn.
    pub fn render(&self) -> String {
        render(self.turns.iter())
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

/// Render turns as `role: content`, one per line.
///
/// Newlines inside a turn are flattened to spaces so each turn stays on a
/// single line.
pub fn render<'a>(turns: impl IntoIterator<Item = &'a ConversationTurn>) -> String {
    let mut out = String::new();
    for turn in turns {
        let content = turn.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let _ = writeln!(out, "{}: {}", turn.role, content);
    }
    out
}

/// The two messages sent to the chat model for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system_prompt: String,
    pub user_message: String,
}

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using the \
knowledge base excerpts provided in the user's message. Base your answer on those excerpts \
and on the earlier conversation. If the excerpts do not contain the information needed, say \
clearly that the answer is not supported by the knowledge base before offering anything \
else. When you use an excerpt, mention its category or source.";

const NO_CONTEXT: &str = "(no relevant context was found in the knowledge base)";

/// Build the grounded prompt for `query`.
///
/// Retrieved chunks are numbered in the order given and labeled with
/// their category and source. The output depends only on the inputs.
pub fn assemble_prompt<'a>(
    query: &str,
    results: &[RetrievalResult],
    history: impl IntoIterator<Item = &'a ConversationTurn>,
) -> Prompt {
    let mut user_message = String::from("Context from the knowledge base:\n");
    if results.is_empty() {
        user_message.push_str(NO_CONTEXT);
        user_message.push('\n');
    } else {
        for (i, r) in results.iter().enumerate() {
            let _ = writeln!(
                user_message,
                "[{}] (category: {}, source: {})\n{}\n",
                i + 1,
                r.category,
                r.source_path,
                r.text.trim()
            );
        }
    }

    let transcript = render(history);
    if !transcript.is_empty() {
        user_message.push_str("\nConversation so far:\n");
        user_message.push_str(&transcript);
    }

    let _ = write!(user_message, "\nQuestion: {}", query.trim());

    Prompt {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, category: &str, source: &str) -> RetrievalResult {
        RetrievalResult {
            id: format!("{}-0", source),
            text: text.to_string(),
            category: category.to_string(),
            source_path: source.to_string(),
            similarity: 0.9,
        }
    }

    #[test]
    fn test_append_evicts_oldest_first() {
        let mut history = ConversationHistory::new(20);
        for i in 0..25 {
            history.append_turn(Role::User, format!("turn {}", i));
        }
        assert_eq!(history.len(), 20);
        let contents: Vec<&str> = history.turns().map(|t| t.content.as_str()).collect();
        let expected: Vec<String> = (5..25).map(|i| format!("turn {}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut history = ConversationHistory::new(0);
        history.append_turn(Role::User, "a");
        history.append_turn(Role::Assistant, "b");
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns().next().unwrap().content, "b");
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::default();
        history.append_turn(Role::User, "hello");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.render(), "");
    }

    #[test]
    fn test_render_one_line_per_turn() {
        let mut history = ConversationHistory::default();
        history.append_turn(Role::User, "What color\nis the sky?");
        history.append_turn(Role::Assistant, "Blue.");
        assert_eq!(
            history.render(),
            "user: What color is the sky?\nassistant: Blue.\n"
        );
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let results = vec![result("The sky is blue.", "facts", "facts/sky.txt")];
        let prompt = assemble_prompt("What color is the sky?", &results, std::iter::empty());
        assert!(prompt.user_message.contains("The sky is blue."));
        assert!(prompt
            .user_message
            .contains("[1] (category: facts, source: facts/sky.txt)"));
        assert!(prompt.user_message.ends_with("Question: What color is the sky?"));
        assert!(prompt.system_prompt.contains("not supported"));
        assert!(!prompt.user_message.contains("Conversation so far"));
    }

    #[test]
    fn test_prompt_includes_history() {
        let mut history = ConversationHistory::default();
        history.append_turn(Role::User, "Hi");
        history.append_turn(Role::Assistant, "Hello!");
        let prompt = assemble_prompt("And the grass?", &[], history.turns());
        assert!(prompt.user_message.contains(NO_CONTEXT));
        assert!(prompt
            .user_message
            .contains("Conversation so far:\nuser: Hi\nassistant: Hello!\n"));
    }

    #[test]
    fn test_prompt_deterministic() {
        let results = vec![
            result("Alpha", "a", "a/1.txt"),
            result("Beta", "b", "b/2.txt"),
        ];
        let p1 = assemble_prompt("q", &results, std::iter::empty());
        let p2 = assemble_prompt("q", &results, std::iter::empty());
        assert_eq!(p1, p2);
        let alpha = p1.user_message.find("Alpha").unwrap();
        let beta = p1.user_message.find("Beta").unwrap();
        assert!(alpha < beta);
    }
}
