// src/llm/chunker.rs
// Splits oversized inputs into a ChunkPlan using one of three strategies.
//
// Invariants the rest of the engine relies on:
// - concatenating chunk texts in order (minus recorded overlap prefixes)
//   reproduces the input modulo boundary whitespace;
// - under ByTokenCount, no chunk's estimate exceeds max_chunk_size.

use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;

use crate::core::error::EngineError;
use crate::llm::tokens::TokenEstimator;

lazy_static! {
    /// Sentence terminator followed by whitespace.
    static ref SENTENCE_BOUNDARY: Regex = Regex::new(r"[.!?]\s+").expect("static regex");
}

/// How to split the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Split on blank-line separators; empty chunks discarded.
    ByParagraph,
    /// Split on sentence boundaries, then pack sentences up to the size cap.
    BySentence,
    /// Paragraph-first packing with sentence recursion for oversized paragraphs.
    ByTokenCount,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::ByParagraph => "paragraph",
            ChunkStrategy::BySentence => "sentence",
            ChunkStrategy::ByTokenCount => "token",
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(ChunkStrategy::ByParagraph),
            "sentence" => Ok(ChunkStrategy::BySentence),
            "token" => Ok(ChunkStrategy::ByTokenCount),
            other => Err(EngineError::Config(format!(
                "unknown chunk strategy '{other}'"
            ))),
        }
    }
}

/// One piece of the plan. `text` includes the carried overlap prefix;
/// `text[overlap_prefix_len..]` is the fresh content.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub overlap_prefix_len: usize,
    pub estimated_tokens: usize,
}

impl Chunk {
    /// The chunk text without the carried overlap prefix.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_prefix_len..]
    }
}

/// Ordered split of one input, plus the parameters actually applied.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub strategy: ChunkStrategy,
    pub max_chunk_size: usize,
    pub overlap: usize,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits text into a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct Chunker {
    estimator: TokenEstimator,
    max_chunk_size: usize,
    /// Advisory token overlap carried between consecutive chunks.
    overlap: usize,
}

impl Chunker {
    pub fn new(estimator: TokenEstimator, max_chunk_size: usize, overlap: usize) -> Self {
        Self {
            estimator,
            max_chunk_size: max_chunk_size.max(1),
            overlap,
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Split `text` with the given strategy.
    pub fn split(&self, text: &str, strategy: ChunkStrategy) -> ChunkPlan {
        let pieces = match strategy {
            ChunkStrategy::ByParagraph => paragraphs(text),
            ChunkStrategy::BySentence => self.pack_sentences(split_sentences(text)),
            ChunkStrategy::ByTokenCount => self.split_by_token_count(text),
        };

        let chunks = self.apply_overlap(pieces);
        ChunkPlan {
            chunks,
            strategy,
            max_chunk_size: self.max_chunk_size,
            overlap: self.overlap,
        }
    }

    fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Paragraph-first packing: paragraphs are joined up to the cap with their
    /// blank-line boundary preserved; a paragraph that alone exceeds the cap
    /// is recursively split by sentences and stands apart from its neighbours.
    fn split_by_token_count(&self, text: &str) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for para in paragraphs(text) {
            if self.estimate(&para) > self.max_chunk_size {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(self.pack_sentences(split_sentences(&para)));
                continue;
            }

            if current.is_empty() {
                current = para;
            } else {
                let candidate = format!("{current}\n\n{para}");
                if self.estimate(&candidate) > self.max_chunk_size {
                    chunks.push(std::mem::replace(&mut current, para));
                } else {
                    current = candidate;
                }
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Greedily pack sentences into chunks that stay within the cap.
    fn pack_sentences(&self, sentences: Vec<String>) -> Vec<String> {
        // A single sentence over the cap gets hard-split first so that
        // packing never emits an oversized chunk.
        let mut pieces: Vec<String> = Vec::new();
        for sentence in sentences {
            if self.estimate(&sentence) > self.max_chunk_size {
                pieces.extend(self.hard_split(&sentence));
            } else {
                pieces.push(sentence);
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            if current.is_empty() {
                current = piece;
            } else {
                let candidate = format!("{current} {piece}");
                if self.estimate(&candidate) > self.max_chunk_size {
                    chunks.push(std::mem::replace(&mut current, piece));
                } else {
                    current = candidate;
                }
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Last resort for text with no usable sentence boundaries: pack by
    /// whitespace-separated words, slicing pathological single words by chars.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let mut pieces: Vec<String> = Vec::new();
        for word in text.split_whitespace() {
            if self.estimate(word) > self.max_chunk_size {
                let char_budget = self.estimator.max_chars_for(self.max_chunk_size).max(1);
                let chars: Vec<char> = word.chars().collect();
                for slice in chars.chunks(char_budget) {
                    pieces.push(slice.iter().collect());
                }
            } else {
                pieces.push(word.to_string());
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            if current.is_empty() {
                current = piece;
            } else {
                let candidate = format!("{current} {piece}");
                if self.estimate(&candidate) > self.max_chunk_size {
                    chunks.push(std::mem::replace(&mut current, piece));
                } else {
                    current = candidate;
                }
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Carry the tail of each piece into the next as an advisory prefix.
    /// The prefix is trimmed (or dropped) rather than ever pushing a chunk
    /// past the size cap. Prefixes come from the previous piece's own text,
    /// so overlap never compounds across chunks.
    fn apply_overlap(&self, pieces: Vec<String>) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());

        for i in 0..pieces.len() {
            let text = &pieces[i];
            if self.overlap == 0 || i == 0 {
                chunks.push(Chunk {
                    text: text.clone(),
                    overlap_prefix_len: 0,
                    estimated_tokens: self.estimate(text),
                });
                continue;
            }

            let mut prefix_words: Vec<&str> = Vec::new();
            let mut carried = 0usize;
            for word in pieces[i - 1].split_whitespace().rev() {
                if carried >= self.overlap {
                    break;
                }
                carried += self.estimate(word).max(1);
                prefix_words.push(word);
            }
            prefix_words.reverse();

            let mut prefix = prefix_words.join(" ");
            while !prefix.is_empty()
                && self.estimate(&format!("{prefix} {text}")) > self.max_chunk_size
            {
                match prefix.split_once(' ') {
                    Some((_, rest)) => prefix = rest.to_string(),
                    None => prefix.clear(),
                }
            }

            let (full, prefix_len) = if prefix.is_empty() {
                (text.clone(), 0)
            } else {
                (format!("{prefix} {text}"), prefix.len() + 1)
            };
            let estimated_tokens = self.estimate(&full);
            chunks.push(Chunk {
                text: full,
                overlap_prefix_len: prefix_len,
                estimated_tokens,
            });
        }

        chunks
    }
}

/// Blank-line paragraph split with whitespace trimmed and empties discarded.
fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split on sentence terminators followed by whitespace, keeping the
/// terminator attached to its sentence.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTENCE_BOUNDARY.find_iter(text) {
        // The terminator class is single-byte, so +1 keeps it on the sentence.
        let end = m.start() + 1;
        let sentence = text[last..end].trim();
        if !sentence.is_empty() {
            out.push(sentence.to_string());
        }
        last = m.end();
    }
    let tail = text[last..].trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}
