//! Error types for tokenizer loading, encoding, decoding and training.

use std::{str::FromStr, string::FromUtf8Error};

use indicatif::style::TemplateError;
use thiserror::Error;

use crate::types::Token;

/// Controls how UTF-8 decoding errors are handled.
///
/// Mirrors Python's `bytes.decode(errors=...)` semantics.
/// Unknown token IDs always produce errors regardless of mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Raise an error on invalid UTF-8 like Python's "strict".
    Strict,
    /// Replace invalid UTF-8 sequences with U+FFFD (like Python's "replace").
    #[default]
    Replace,
}

impl FromStr for ErrorMode {
    type Err = String;

    /// Parses a Python-style error mode string ("strict" or "replace").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "replace" => Ok(Self::Replace),
            _ => Err(format!(
                "invalid error mode: {s:?} (expected \"strict\" or \"replace\")"
            )),
        }
    }
}

/// Errors that can occur during token decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Token ID not found in vocabulary.
    #[error("unknown token id: {0}")]
    UnknownToken(Token),
    /// Decoded bytes are not valid UTF-8.
    #[error("invalid UTF-8 in decoded bytes: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    /// Progress bar template string was invalid.
    #[error("template parsing failed: {0}")]
    ProgressBarSetup(#[from] TemplateError),
}

/// Errors that can occur during text encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Regex engine failed during text splitting (e.g. backtracking limit exceeded).
    #[error("regex match failed: {0}")]
    RegexMatch(String),
    /// Progress bar template string was invalid.
    #[error("template parsing failed: {0}")]
    ProgressBarSetup(#[from] TemplateError),
}

impl From<fancy_regex::Error> for EncodeError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::RegexMatch(e.to_string())
    }
}

/// Structural problems found while validating a vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Fewer than 256 tokens, or a base token is not a single byte.
    #[error("base token {id} is not a single byte")]
    InvalidBaseToken {
        /// Offending id.
        id: Token,
    },
    /// No base token covers this byte value.
    #[error("no base token for byte 0x{0:02x}")]
    MissingBaseByte(u8),
    /// The same id appears twice.
    #[error("duplicate token id: {0}")]
    DuplicateId(Token),
    /// Two ids share the same byte sequence.
    #[error("token {id} duplicates the bytes of token {existing}")]
    DuplicateBytes {
        /// The later id.
        id: Token,
        /// The id that already owns these bytes.
        existing: Token,
    },
    /// Token ids do not form a contiguous range starting at 0.
    #[error("non-contiguous token ids: expected {expected}, found {found}")]
    NonContiguous {
        /// Id expected at this position.
        expected: Token,
        /// Id actually found.
        found: Token,
    },
    /// A non-base token has an empty byte sequence.
    #[error("token {0} has an empty byte sequence")]
    EmptyToken(Token),
    /// A merge refers to an id that is not in the vocabulary.
    #[error("merge {rank} references unknown token id {id}")]
    UnknownConstituent {
        /// Rank of the offending merge.
        rank: usize,
        /// The unknown id.
        id: Token,
    },
    /// A merge targets a base token.
    #[error("merge {rank} produces base token {merged}")]
    MergeIntoBase {
        /// Rank of the offending merge.
        rank: usize,
        /// The base id it targets.
        merged: Token,
    },
    /// The merged token's bytes are not the concatenation of its constituents.
    #[error("merge {rank} bytes do not match token {merged}")]
    MergeMismatch {
        /// Rank of the offending merge.
        rank: usize,
        /// The merged id.
        merged: Token,
    },
    /// A multi-byte token that no merge produces.
    #[error("token {0} is not produced by any merge")]
    OrphanToken(Token),
    /// A special token id collides with the mergeable vocabulary or another special.
    #[error("special token id already in use: {0}")]
    SpecialIdCollision(Token),
    /// A special token string is empty or collides with a vocabulary entry.
    #[error("illegal special token: {0:?}")]
    IllegalSpecialToken(String),
}

/// Errors that can occur when loading a model or vocabulary file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Reading the source failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The model file is not valid JSON for the expected schema.
    #[error("invalid model json: {0}")]
    Json(#[from] serde_json::Error),
    /// A byte sequence is not valid base64.
    #[error("invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    /// A tiktoken line could not be parsed.
    #[error("invalid vocabulary line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
    /// The model declares a format version this crate does not understand.
    #[error("unsupported model format version {0}")]
    UnsupportedVersion(u32),
    /// The pre-tokenizer pattern failed to compile.
    #[error("invalid pre-tokenizer pattern: {0}")]
    InvalidPattern(#[from] fancy_regex::Error),
    /// The vocabulary failed structural validation.
    #[error("malformed model: {0}")]
    Malformed(#[from] ModelError),
}

/// Errors that can occur during vocabulary training.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Target vocabulary size leaves no room for merges.
    #[error("vocab size {vocab_size} must exceed the {reserved} reserved base and special tokens")]
    VocabSizeTooSmall {
        /// Requested vocabulary size.
        vocab_size: usize,
        /// 256 base tokens plus the number of special tokens.
        reserved: usize,
    },
    /// A special token was declared twice or is empty.
    #[error("illegal special token: {0:?}")]
    IllegalSpecialToken(String),
    /// The pre-tokenizer pattern failed to compile.
    #[error("invalid pre-tokenizer pattern: {0}")]
    InvalidPattern(#[from] fancy_regex::Error),
    /// Splitting a corpus text failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The learned vocabulary failed validation.
    #[error("trained vocabulary is malformed: {0}")]
    Malformed(#[from] ModelError),
    /// Progress bar template string was invalid.
    #[error("template parsing failed: {0}")]
    ProgressBarSetup(#[from] TemplateError),
}

/// Top-level error for the host-facing [`Session`](crate::Session) surface.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// `encode`/`decode` was called before `init`.
    #[error("tokenizer is not initialized; call init first")]
    Uninitialized,
    /// Loading the vocabulary failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Encoding failed.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Decoding failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Training failed.
    #[error(transparent)]
    Train(#[from] TrainError),
}
