use thiserror::Error;

/// Why a model completion could not be turned into a JSON object.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Completion is empty")]
    EmptyCompletion,

    #[error("No JSON object found in completion")]
    NoJsonObject,

    #[error("Completion parsed as a JSON {found}, expected an object")]
    NotAnObject { found: &'static str },
}

pub type ParseResult<T> = Result<T, ParseError>;
