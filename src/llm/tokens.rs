// src/llm/tokens.rs
// Conservative token estimation for routing decisions.
//
// No real tokenizer ships with the engine; estimates are a chars-per-token
// upper bound. The delegator uses them only to pick a pool, never to reject
// an already-accepted request.

/// Maps text to an integer token estimate for a model family.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    /// Characters per token for families with no better figure.
    default_ratio: usize,
}

impl TokenEstimator {
    pub fn new(default_ratio: usize) -> Self {
        // Ratio of zero would divide by zero; config validation rejects it,
        // this is a second line for direct constructions.
        Self {
            default_ratio: default_ratio.max(1),
        }
    }

    /// Estimate with the conservative default ratio.
    ///
    /// Monotone in input length: longer text never yields a smaller estimate.
    pub fn estimate(&self, text: &str) -> usize {
        Self::ceil_div(text.chars().count(), self.default_ratio)
    }

    /// Estimate for a named model family, using a family-specific ratio
    /// where one is known and the conservative default otherwise.
    pub fn estimate_for_model(&self, text: &str, model_id: &str) -> usize {
        let ratio = family_ratio(model_id).unwrap_or(self.default_ratio);
        Self::ceil_div(text.chars().count(), ratio)
    }

    /// Largest character count whose estimate stays within `tokens`.
    pub fn max_chars_for(&self, tokens: usize) -> usize {
        tokens * self.default_ratio
    }

    fn ceil_div(chars: usize, ratio: usize) -> usize {
        chars.div_ceil(ratio)
    }
}

/// Characters-per-token figures for families we have observed.
/// Smaller ratio = more conservative (higher) estimate.
fn family_ratio(model_id: &str) -> Option<usize> {
    if model_id.starts_with("gemini") {
        Some(4)
    } else if model_id.starts_with("llama") || model_id.starts_with("qwen") {
        Some(3)
    } else {
        None
    }
}
