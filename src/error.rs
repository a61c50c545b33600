use thiserror::Error;

/// Failure while evaluating a rule expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("no DOM node is bound for `{0}`")]
    NoNode(String),

    #[error("`{op}` expects {expected}, got {found}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("invalid pattern `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Failure while resolving a URL to a publisher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// The host has no resolvable public suffix.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A rule that needs the page markup matched, but none was supplied.
    #[error("markup parameter required by rule {rule_index}")]
    MissingMarkup { rule_index: usize },

    #[error("invalid node selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("rule {rule_index} failed to evaluate: {source}")]
    Evaluation {
        rule_index: usize,
        #[source]
        source: EvalError,
    },
}

/// Failure while loading a rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to parse rule table: {0}")]
    Parse(String),

    #[error("rule {index} violates the rule schema: {reason}")]
    SchemaViolation { index: usize, reason: String },

    #[error("failed to read rule table: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while configuring or restoring a scoring engine.
#[derive(Debug, Error)]
pub enum SynopsisError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("corrupt state for publisher `{publisher}`: {reason}")]
    Corrupt { publisher: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
