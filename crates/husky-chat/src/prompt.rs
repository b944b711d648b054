//! Prompt composition and citation extraction.
//!
//! The prompt for one turn is: fixed system instructions, the thread
//! summary (if any), the last few raw messages, and the retrieved directory
//! documents rendered with stable `[n]` markers the model is asked to cite.

use husky_core::types::{Message, Summary};
use husky_vector::RetrievedDocument;

/// Fixed system instructions for every completion.
pub const SYSTEM_PROMPT: &str = "\
You are Husky, the assistant for a professional directory platform. Answer \
questions about members, teams, projects, focus areas, events, and shared \
documents using only the directory documents provided. Cite every factual \
claim with the bracketed number of its supporting document, e.g. [1]. If \
the documents do not contain the answer, say so plainly instead of \
guessing.";

/// Instruction used when retrieval found nothing relevant.
const NO_GROUNDING: &str = "\
No directory documents matched this question. Answer from the conversation \
alone, and tell the user when the directory has no data on the subject.";

/// A fully composed turn prompt plus the document ids behind each marker.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub system: String,
    pub prompt: String,
    /// Document id for marker `[n]` at index `n - 1`.
    pub doc_ids: Vec<String>,
}

/// Compose the completion prompt for a turn.
///
/// `recent` must not include the message being answered; it is rendered
/// separately at the end.
pub fn compose(
    summary: Option<&Summary>,
    recent: &[Message],
    documents: &[RetrievedDocument],
    user_message: &str,
) -> ComposedPrompt {
    let mut prompt = String::new();

    if let Some(summary) = summary {
        prompt.push_str("Conversation so far (summarized):\n");
        prompt.push_str(&summary.text);
        prompt.push_str("\n\n");
    }

    if !recent.is_empty() {
        prompt.push_str("Recent messages:\n");
        for message in recent {
            prompt.push_str(message.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&message.text);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    let doc_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    if documents.is_empty() {
        prompt.push_str(NO_GROUNDING);
        prompt.push_str("\n\n");
    } else {
        prompt.push_str("Directory documents:\n");
        for (i, doc) in documents.iter().enumerate() {
            prompt.push_str(&format!("[{}] ({}) {}\n", i + 1, doc.id, doc.text));
        }
        prompt.push('\n');
    }

    prompt.push_str("User question: ");
    prompt.push_str(user_message);

    ComposedPrompt {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        doc_ids,
    }
}

/// Map the `[n]` markers in an answer back to document ids, first
/// occurrence order, duplicates removed. An answer with no markers is
/// treated as drawing on everything it was given.
pub fn extract_citations(answer: &str, doc_ids: &[String]) -> Vec<String> {
    let mut cited = Vec::new();
    let mut chars = answer.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '[' {
            continue;
        }
        let Some(end) = answer[start + 1..].find(']') else {
            break;
        };
        let inner = &answer[start + 1..start + 1 + end];
        if let Ok(n) = inner.parse::<usize>() {
            if n >= 1 {
                if let Some(id) = doc_ids.get(n - 1) {
                    if !cited.contains(id) {
                        cited.push(id.clone());
                    }
                }
            }
        }
    }

    if cited.is_empty() && !doc_ids.is_empty() {
        return doc_ids.to_vec();
    }
    cited
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use husky_core::types::{ChatRole, SourceType};

    fn doc(id: &str, text: &str) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            source_type: SourceType::Member,
            score: 0.9,
            text: text.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    fn message(role: ChatRole, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            seq: 1,
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            citations: vec![],
        }
    }

    #[test]
    fn test_compose_renders_all_sections() {
        let summary = Summary {
            thread_id: Uuid::new_v4(),
            text: "User is exploring climate projects.".to_string(),
            covered_through: Uuid::new_v4(),
            updated_at: Utc::now(),
            token_count: 5,
        };
        let recent = vec![
            message(ChatRole::User, "who works on climate?"),
            message(ChatRole::Assistant, "Two teams do."),
        ];
        let docs = vec![doc("member:m-1", "Ada, climate modeling")];

        let composed = compose(Some(&summary), &recent, &docs, "tell me more about Ada");
        assert!(composed.prompt.contains("User is exploring climate projects."));
        assert!(composed.prompt.contains("user: who works on climate?"));
        assert!(composed.prompt.contains("[1] (member:m-1) Ada, climate modeling"));
        assert!(composed.prompt.ends_with("tell me more about Ada"));
        assert_eq!(composed.doc_ids, vec!["member:m-1"]);
    }

    #[test]
    fn test_compose_without_grounding_instructs_explicitly() {
        let composed = compose(None, &[], &[], "anything on quantum networking?");
        assert!(composed.prompt.contains("No directory documents matched"));
        assert!(composed.doc_ids.is_empty());
    }

    #[test]
    fn test_markers_are_stable_and_ordered() {
        let docs = vec![doc("a:1", "first"), doc("b:2", "second"), doc("c:3", "third")];
        let composed = compose(None, &[], &docs, "q");
        let p1 = composed.prompt.find("[1] (a:1)").unwrap();
        let p2 = composed.prompt.find("[2] (b:2)").unwrap();
        let p3 = composed.prompt.find("[3] (c:3)").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn test_extract_citations_in_first_occurrence_order() {
        let ids = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
        let cited = extract_citations("Per [2] and [1], also [2] again.", &ids);
        assert_eq!(cited, vec!["b:2".to_string(), "a:1".to_string()]);
    }

    #[test]
    fn test_extract_citations_ignores_out_of_range_markers() {
        let ids = vec!["a:1".to_string()];
        let cited = extract_citations("See [1] and [7] and [0].", &ids);
        assert_eq!(cited, vec!["a:1".to_string()]);
    }

    #[test]
    fn test_extract_citations_without_markers_falls_back_to_all() {
        let ids = vec!["a:1".to_string(), "b:2".to_string()];
        let cited = extract_citations("The directory lists two teams.", &ids);
        assert_eq!(cited, ids);
    }

    #[test]
    fn test_extract_citations_empty_doc_set() {
        let cited = extract_citations("Nothing to cite [1].", &[]);
        assert!(cited.is_empty());
    }
}
