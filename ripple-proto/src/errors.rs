use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Missing chunk header: {0}")]
    MissingHeader(&'static str),

    #[error("Unparseable chunk order header: {0:?}")]
    BadOrder(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
