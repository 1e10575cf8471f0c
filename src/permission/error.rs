use thiserror::Error;

/// Structured failures from the permission grammar. A malformed string is
/// always an error, never a silent skip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("empty permission string")]
    Empty,

    #[error("permission '{0}' needs at least a scope and an action segment")]
    MissingAction(String),

    #[error("permission '{0}' has too many segments")]
    TooManySegments(String),

    #[error("permission '{text}' has an empty segment at position {position}")]
    EmptySegment { text: String, position: usize },

    #[error("unknown action '{action}' in permission '{text}'")]
    UnknownAction { text: String, action: String },

    #[error("malformed row filter clause '{clause}' in permission '{text}'")]
    MalformedFilter { text: String, clause: String },

    #[error("invalid filter field name '{field}' in permission '{text}'")]
    InvalidFilterField { text: String, field: String },

    #[error("unterminated quoted value in permission '{0}'")]
    UnterminatedQuote(String),
}
