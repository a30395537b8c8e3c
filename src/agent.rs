use rig::{
    agent::AgentBuilder,
    completion::{CompletionModel, Prompt},
    embeddings::EmbeddingModel,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::character::Character;
use crate::history::{ChatHistory, Exchange};
use crate::knowledge::{KnowledgeBase, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
use crate::stores::sqlite::KnowledgeEntry;

const FORMAT_INSTRUCTIONS: &str = r#"Return your answer as a JSON object with a single "response" field holding the full message for the user, for example:
```json
{"response": "<your response here>"}
```
Return only the JSON object."#;

/// Shape the model is asked to reply in.
#[derive(Debug, Deserialize)]
struct StructuredReply {
    response: String,
}

#[derive(Clone)]
pub struct Agent<M: CompletionModel, E: EmbeddingModel + 'static> {
    pub character: Character,
    completion_model: M,
    knowledge: KnowledgeBase<E>,
    history: ChatHistory,
    top_k: usize,
    min_similarity: f64,
}

impl<M: CompletionModel, E: EmbeddingModel> Agent<M, E> {
    pub fn new(
        character: Character,
        completion_model: M,
        knowledge: KnowledgeBase<E>,
        history: ChatHistory,
    ) -> Self {
        info!(name = character.name, "Creating new agent");

        Self {
            character,
            completion_model,
            knowledge,
            history,
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn with_retrieval(mut self, top_k: usize, min_similarity: f64) -> Self {
        self.top_k = top_k;
        self.min_similarity = min_similarity;
        self
    }

    pub fn knowledge(&self) -> &KnowledgeBase<E> {
        &self.knowledge
    }

    /// Answers one user message: retrieve knowledge context, fold in the
    /// session history, prompt the model, parse the structured reply and
    /// record the exchange.
    pub async fn respond(
        &self,
        message: &str,
        session_id: &str,
        user_id: &str,
    ) -> anyhow::Result<String> {
        let entries = self
            .knowledge
            .retrieve(message, self.top_k, self.min_similarity)
            .await?;
        let context = render_context(&entries);
        debug!(context = %context, "Knowledge context");

        let exchanges = self.history.session(session_id).await?;
        let history_text = render_history(&exchanges);

        let agent = AgentBuilder::new(self.completion_model.clone())
            .preamble(&self.character.preamble)
            .context(FORMAT_INSTRUCTIONS)
            .context(&format!("Knowledge Base Context:\n{}", context))
            .context(&format!("Conversation history:\n{}", history_text))
            .build();

        let completion = agent.prompt(message).await?;
        debug!(completion = %completion, "Generated completion");
        let reply = extract_reply(&completion);

        self.history
            .append(session_id, user_id, message, &reply)
            .await?;

        Ok(reply)
    }
}

fn render_context(entries: &[KnowledgeEntry]) -> String {
    if entries.is_empty() {
        return "No relevant information found.".to_string();
    }
    entries
        .iter()
        .map(|entry| format!("- {}", entry.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_history(exchanges: &[Exchange]) -> String {
    exchanges
        .iter()
        .map(|exchange| format!("User: {}\nBot: {}", exchange.user, exchange.bot))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pulls the "response" field out of the completion. Models usually return
/// the requested JSON object, sometimes inside a ```json fence or wrapped in
/// prose; anything unparseable falls back to the raw text.
fn extract_reply(completion: &str) -> String {
    let body = strip_code_fence(completion);

    if let Ok(parsed) = serde_json::from_str::<StructuredReply>(body) {
        return parsed.response;
    }

    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<StructuredReply>(&body[start..=end]) {
                return parsed.response;
            }
        }
    }

    debug!("Completion was not the requested JSON shape, using raw text");
    completion.trim().to_string()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(topic: &str, text: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            topic: topic.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn extracts_plain_json_reply() {
        assert_eq!(
            extract_reply(r#"{"response": "Restart the router."}"#),
            "Restart the router."
        );
    }

    #[test]
    fn extracts_fenced_json_reply() {
        let completion = "```json\n{\"response\": \"Restart the router.\"}\n```";
        assert_eq!(extract_reply(completion), "Restart the router.");
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let completion = "Here you go:\n{\"response\": \"Restart the router.\"}\nHope that helps!";
        assert_eq!(extract_reply(completion), "Restart the router.");
    }

    #[test]
    fn falls_back_to_raw_text() {
        assert_eq!(
            extract_reply("  Restart the router.  "),
            "Restart the router."
        );
    }

    #[test]
    fn falls_back_on_wrong_json_shape() {
        assert_eq!(
            extract_reply(r#"{"answer": "Restart the router."}"#),
            r#"{"answer": "Restart the router."}"#
        );
    }

    #[test]
    fn empty_context_has_placeholder() {
        assert_eq!(render_context(&[]), "No relevant information found.");
    }

    #[test]
    fn context_is_a_bullet_per_entry() {
        let entries = vec![
            entry("VPN", "Install the VPN client."),
            entry("Email", "Configure the mail profile."),
        ];
        assert_eq!(
            render_context(&entries),
            "- Install the VPN client.\n- Configure the mail profile."
        );
    }

    #[test]
    fn history_renders_user_and_bot_lines() {
        let exchanges = vec![
            Exchange {
                user: "hi".into(),
                bot: "Hello!".into(),
                timestamp: "2025-01-01 09:00:00 AM".into(),
            },
            Exchange {
                user: "vpn?".into(),
                bot: "Install the client.".into(),
                timestamp: "2025-01-01 09:01:00 AM".into(),
            },
        ];
        assert_eq!(
            render_history(&exchanges),
            "User: hi\nBot: Hello!\nUser: vpn?\nBot: Install the client."
        );
    }

    #[test]
    fn empty_history_renders_empty() {
        assert_eq!(render_history(&[]), "");
    }
}
