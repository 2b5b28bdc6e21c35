// src/core/error.rs
// Unified error type and the five-kind classification used by routing.

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Classification of a backend failure. Routing decisions key off this, so
/// the mapping for a given error must not change within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network hiccup, 5xx, provider timeout. A fallback attempt may succeed.
    Transient,
    /// The chosen model cannot accept the input. A larger window may succeed.
    ContextOverflow,
    /// Invalid or missing credentials. User-actionable, never retried.
    Auth,
    /// Malformed request or unknown provider failure. Never retried.
    Permanent,
    /// Deadline expired or the caller cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Severity used when two failures are folded into one composite error.
    /// Ordering: Auth > Permanent > ContextOverflow > Transient > Cancelled.
    pub fn severity(&self) -> u8 {
        match self {
            ErrorKind::Auth => 4,
            ErrorKind::Permanent => 3,
            ErrorKind::ContextOverflow => 2,
            ErrorKind::Transient => 1,
            ErrorKind::Cancelled => 0,
        }
    }

    /// The worse of two kinds by severity.
    pub fn worse(self, other: ErrorKind) -> ErrorKind {
        if self.severity() >= other.severity() {
            self
        } else {
            other
        }
    }

    /// Whether the delegator may try the base pool after this failure.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::ContextOverflow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::ContextOverflow => "context_overflow",
            ErrorKind::Auth => "auth",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for engine operations
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // Backend failures, already classified by the adapter that produced them
    #[error("{model}: {message}")]
    Provider {
        model: String,
        kind: ErrorKind,
        message: String,
    },

    // Both the initial attempt and the fallback failed
    #[error("initial attempt failed ({initial_model}: {initial_message}), fallback failed ({fallback_model}: {fallback_message})")]
    BothAttemptsFailed {
        kind: ErrorKind,
        initial_model: String,
        initial_message: String,
        fallback_model: String,
        fallback_message: String,
    },

    // Chunked processing where one or more chunks failed
    #[error("{failed} of {total} chunks failed: {message}")]
    ChunksFailed {
        kind: ErrorKind,
        failed: usize,
        total: usize,
        message: String,
    },

    // MoA iteration where every agent failed
    #[error("all {agents} agents failed in iteration {iteration}")]
    AllAgentsFailed { agents: usize, iteration: usize },

    // Validation
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("input produced zero chunks")]
    EmptyPlan,

    #[error("no model named '{0}' is bound to either pool")]
    UnknownModel(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("API key not configured for provider '{0}'")]
    ApiKeyMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // Lifecycle
    #[error("inference service is not running")]
    NotRunning,

    #[error("MoA pipeline is not configured")]
    MoaUnconfigured,

    // Deadlines
    #[error("deadline expired during {0}")]
    DeadlineExpired(String),
}

impl EngineError {
    /// Create a classified provider error.
    pub fn provider(model: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            model: model.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shortcut for deadline expiry outside any named operation.
    pub fn cancelled() -> Self {
        Self::DeadlineExpired("request".to_string())
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Provider { kind, .. } => *kind,
            EngineError::BothAttemptsFailed { kind, .. } => *kind,
            EngineError::ChunksFailed { kind, .. } => *kind,
            EngineError::AllAgentsFailed { .. } => ErrorKind::Transient,
            EngineError::EmptyPrompt
            | EngineError::EmptyPlan
            | EngineError::UnknownModel(_)
            | EngineError::UnknownProvider(_)
            | EngineError::Config(_)
            | EngineError::NotRunning
            | EngineError::MoaUnconfigured => ErrorKind::Permanent,
            EngineError::ApiKeyMissing(_) => ErrorKind::Auth,
            EngineError::DeadlineExpired(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Map an HTTP status plus response body to an error kind.
///
/// The body is consulted because some providers report an oversized input as
/// a plain 400 with a recognisable message rather than a dedicated status.
pub fn classify_status(status: u16, body: &str) -> ErrorKind {
    if is_overflow_message(body) {
        return ErrorKind::ContextOverflow;
    }
    match status {
        401 | 403 => ErrorKind::Auth,
        408 | 429 => ErrorKind::Transient,
        s if s >= 500 => ErrorKind::Transient,
        s if s >= 400 => ErrorKind::Permanent,
        _ => ErrorKind::Transient,
    }
}

/// Map a transport-level failure (no HTTP status available) to a kind.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ErrorKind::Transient
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), "")
    } else {
        ErrorKind::Transient
    }
}

/// Recognise "input too large for this model" phrasings across providers.
fn is_overflow_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("context length")
        || lower.contains("input too large")
        || lower.contains("token limit")
        || lower.contains("too many tokens")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorKind::Auth.severity() > ErrorKind::Permanent.severity());
        assert!(ErrorKind::Permanent.severity() > ErrorKind::ContextOverflow.severity());
        assert!(ErrorKind::ContextOverflow.severity() > ErrorKind::Transient.severity());
        assert!(ErrorKind::Transient.severity() > ErrorKind::Cancelled.severity());
    }

    #[test]
    fn test_worse_is_commutative_on_distinct_kinds() {
        assert_eq!(
            ErrorKind::Transient.worse(ErrorKind::Permanent),
            ErrorKind::Permanent
        );
        assert_eq!(
            ErrorKind::Permanent.worse(ErrorKind::Transient),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn test_fallback_eligibility() {
        assert!(ErrorKind::Transient.allows_fallback());
        assert!(ErrorKind::ContextOverflow.allows_fallback());
        assert!(!ErrorKind::Auth.allows_fallback());
        assert!(!ErrorKind::Permanent.allows_fallback());
        assert!(!ErrorKind::Cancelled.allows_fallback());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401, ""), ErrorKind::Auth);
        assert_eq!(classify_status(403, ""), ErrorKind::Auth);
        assert_eq!(classify_status(400, ""), ErrorKind::Permanent);
        assert_eq!(classify_status(429, ""), ErrorKind::Transient);
        assert_eq!(classify_status(500, ""), ErrorKind::Transient);
        assert_eq!(classify_status(503, ""), ErrorKind::Transient);
    }

    #[test]
    fn test_overflow_recognised_regardless_of_status() {
        assert_eq!(
            classify_status(400, "error: context_length_exceeded"),
            ErrorKind::ContextOverflow
        );
        assert_eq!(
            classify_status(422, "Input too large for model"),
            ErrorKind::ContextOverflow
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(EngineError::EmptyPrompt.kind(), ErrorKind::Permanent);
        assert_eq!(
            EngineError::ApiKeyMissing("cerebras".into()).kind(),
            ErrorKind::Auth
        );
        assert_eq!(EngineError::cancelled().kind(), ErrorKind::Cancelled);
        assert_eq!(
            EngineError::AllAgentsFailed {
                agents: 3,
                iteration: 1
            }
            .kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_composite_display_names_both_models() {
        let err = EngineError::BothAttemptsFailed {
            kind: ErrorKind::Permanent,
            initial_model: "llama-4-scout-17b-16e-instruct".into(),
            initial_message: "upstream 500".into(),
            fallback_model: "gemini-2.0-flash".into(),
            fallback_message: "bad request".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("llama-4-scout-17b-16e-instruct"));
        assert!(msg.contains("gemini-2.0-flash"));
    }
}
