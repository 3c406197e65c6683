use crate::chunking::estimate_token_count;
use crate::error::Result;
use crate::ranking::ScoredChunk;
use log::debug;
use serde::{Deserialize, Serialize};

/// Separator placed between context chunks in the system prompt
pub const CONTEXT_DELIMITER: &str = "\n\n-----\n\n";

/// Answers are generated deterministically
pub const ANSWER_TEMPERATURE: f32 = 0.0;

const ANSWER_INSTRUCTIONS: &str = "Answer the user's question using the context above. \
If the context does not contain the answer, you may fall back to your own general knowledge. \
Respond with a markdown formatted string.";

/// A chat model able to answer with a system prompt
#[allow(async_fn_in_trait)]
pub trait ChatModel {
    /// Name of the configured chat model
    fn chat_model(&self) -> &str;

    /// Run one completion and return the first candidate's text
    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String>;

    /// Check that the model handle resolves
    async fn resolve_chat_model(&self) -> Result<()>;
}

/// Grounded answer together with the chunks it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub context: Vec<ScoredChunk>,
}

/// Build the system prompt: every chunk's text, delimited, then the instructions
pub fn build_system_prompt(chunks: &[ScoredChunk]) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.chunk_text.as_str())
        .collect::<Vec<&str>>()
        .join(CONTEXT_DELIMITER);

    format!(
        "Context:{}{}{}{}",
        CONTEXT_DELIMITER, context, CONTEXT_DELIMITER, ANSWER_INSTRUCTIONS
    )
}

/// Ask the chat model `question` grounded on `chunks`
pub async fn synthesize<C: ChatModel>(
    chat: &C,
    question: &str,
    chunks: Vec<ScoredChunk>,
) -> Result<Answer> {
    let system_prompt = build_system_prompt(&chunks);
    debug!(
        "Prompting {} with {} chunks (~{} tokens)",
        chat.chat_model(),
        chunks.len(),
        estimate_token_count(&system_prompt)
    );

    let answer = chat
        .complete(&system_prompt, question, ANSWER_TEMPERATURE)
        .await?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        context: chunks,
    })
}
