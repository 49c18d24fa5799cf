use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::NormalError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    Config(String),
    SequenceTooLong {
        got: usize,
        max: usize,
    },
    TokenOutOfRange {
        token: u32,
        vocab_size: usize,
    },
    WeightMismatch(String),
    UnknownModelType(String),
    UnknownParam(String),
    NoPendingBackward,
    EmptyCompletion {
        candidate: usize,
    },
    EmptyPrompt,
    Init(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}, got {got} and expected {expected}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            MlErr::SequenceTooLong { got, max } => {
                write!(f, "cannot forward sequence of length {got}, block size is only {max}")
            }
            MlErr::TokenOutOfRange { token, vocab_size } => {
                write!(f, "token id {token} is outside the vocabulary of size {vocab_size}")
            }
            MlErr::WeightMismatch(detail) => write!(f, "pretrained weights mismatch: {detail}"),
            MlErr::UnknownModelType(model_type) => write!(f, "unknown model type {model_type:?}"),
            MlErr::UnknownParam(name) => write!(f, "no parameter named {name:?}"),
            MlErr::NoPendingBackward => {
                f.write_str("backward called without a preceding training forward with targets")
            }
            MlErr::EmptyCompletion { candidate } => {
                write!(f, "candidate {candidate} has no masked completion positions")
            }
            MlErr::EmptyPrompt => f.write_str("cannot sample from an empty prompt"),
            MlErr::Init(detail) => write!(f, "parameter initialization failed: {detail}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::Init(value.to_string())
    }
}
