//! Prompt construction for the generation stage.

use counsel_index::Chunk;
use counsel_protocol::ResponseStyle;

/// Assemble the generation prompt from the question, its supporting chunks
/// and the requested answer style. Passages are numbered so technical
/// answers can cite them inline.
pub fn build_prompt(question: &str, chunks: &[Chunk], style: ResponseStyle) -> String {
    let mut prompt = String::from(style_preamble(style));
    prompt.push_str("\n\nContext passages:\n");
    for (position, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] (source: {})\n{}\n",
            position + 1,
            chunk.document_id,
            chunk.text.trim()
        ));
    }
    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", question.trim()));
    prompt
}

fn style_preamble(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Concise => {
            "Answer the question using only the context passages. Be brief and direct."
        }
        ResponseStyle::Detailed => {
            "Answer the question using only the context passages. Explain the relevant \
             background and note any caveats the passages raise."
        }
        ResponseStyle::Technical => {
            "Answer the question using only the context passages. Use precise terminology \
             and cite passages inline by their bracketed number."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passages() -> Vec<Chunk> {
        vec![
            Chunk::new("contract", "The notice period is thirty days.", vec![1.0]),
            Chunk::new("handbook", "Notice must be given in writing.", vec![1.0]),
        ]
    }

    #[test]
    fn prompt_numbers_passages_and_ends_with_the_question() {
        let prompt = build_prompt(
            "What is the notice period?",
            &passages(),
            ResponseStyle::Concise,
        );
        assert!(prompt.contains("[1] (source: contract)"));
        assert!(prompt.contains("[2] (source: handbook)"));
        assert!(prompt.ends_with("Question: What is the notice period?\nAnswer:"));
    }

    #[test]
    fn styles_produce_distinct_preambles() {
        let concise = build_prompt("q", &passages(), ResponseStyle::Concise);
        let technical = build_prompt("q", &passages(), ResponseStyle::Technical);
        assert_ne!(concise, technical);
        assert!(technical.contains("cite passages"));
    }
}
