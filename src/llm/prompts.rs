// src/llm/prompts.rs
// Prompt construction for strategies, chunked processing, and MoA aggregation.

/// Separator used when reassembling chunk outputs.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Placeholder inserted for a chunk that failed (1-based index).
pub fn chunk_error_placeholder(index: usize) -> String {
    format!("[ERROR PROCESSING CHUNK {index}]")
}

/// Step-by-step directive wrapped around the user prompt.
pub fn chain_of_thought(prompt: &str) -> String {
    format!(
        "Think step-by-step to answer the following question:\n{prompt}\n\nReasoning steps:"
    )
}

/// Review prompt embedding the original prompt and the initial answer.
pub fn reflection(original: &str, initial_response: &str) -> String {
    format!(
        "Original prompt: {original}\n\nInitial response: {initial_response}\n\n\
         Please review the initial response for accuracy, completeness, and clarity. \
         Provide a revised and improved response based on your review."
    )
}

/// Directive demanding a JSON document matching the supplied schema.
pub fn structured(content: &str, schema: &str) -> String {
    format!(
        "Analyze the following content:\n\n---\n{content}\n---\n\n\
         Please extract the relevant information and respond ONLY with a valid JSON object \
         strictly adhering to the following JSON schema:\n```json\n{schema}\n```"
    )
}

/// Per-chunk prompt for parallel processing.
pub fn parallel_chunk(instruction: &str, chunk: &str) -> String {
    format!("{instruction}\n\n---\n{chunk}\n---")
}

/// First chunk of a sequential run carries no previous context.
pub fn sequential_first(instruction: &str, chunk: &str) -> String {
    format!("Overall Task: {instruction}\n\nCurrent Section:\n---\n{chunk}\n---")
}

/// Later chunks carry a rolling summary of the previous chunk's output.
pub fn sequential_followup(instruction: &str, summary: &str, chunk: &str) -> String {
    format!(
        "Overall Task: {instruction}\n\nSummary of previous output:\n{summary}\n\n\
         Current Section:\n---\n{chunk}\n---"
    )
}

/// Aggregation prompt listing agent outputs in roster order.
pub fn aggregate(original_prompt: &str, outputs: &[String]) -> String {
    let mut listing = String::new();
    for (i, output) in outputs.iter().enumerate() {
        listing.push_str(&format!("Response {}:\n{}\n\n", i + 1, output));
    }
    format!(
        "You are given several candidate responses to the same prompt.\n\n\
         Prompt:\n{original_prompt}\n\n{listing}\
         Synthesize the candidates into a single, consolidated response. \
         Keep the strongest content from each and resolve any disagreements. \
         Return only the consolidated response."
    )
}

/// Agent prompt for MoA iterations after the first: the original prompt plus
/// the previous iteration's consolidated answer.
pub fn moa_iteration(original_prompt: &str, previous_aggregate: &str) -> String {
    format!(
        "{original_prompt}\n\nPrevious consolidated answer:\n{previous_aggregate}\n\n\
         Refine and improve on the consolidated answer above."
    )
}
