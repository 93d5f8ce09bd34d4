//! Byte-level BPE tokenizer: training, encoding and decoding.
//!
//! Text is split into chunks by a regex pre-tokenizer (the `cl100k_base` rule
//! by default), each chunk's UTF-8 bytes are mapped to base tokens, and learned
//! merges are applied greedily by rank. Vocabularies can be trained from a
//! corpus, saved as JSON, or imported from tiktoken rank files, which makes
//! encodings compatible with `cl100k_base`.
//!
//! ```
//! use bytebpe::{Tokenizer, train};
//!
//! let model = train(&["low lower lowest", "low lower lowest"], 300).unwrap();
//! let tokenizer = Tokenizer::from_model(model).unwrap();
//! let ids = tokenizer.encode("lower").unwrap();
//! assert_eq!(tokenizer.decode(&ids).unwrap(), "lower");
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod decoder;
mod encoder;
pub mod error;
pub mod model;
pub mod pretokenizer;
mod progress;
pub mod session;
pub mod tokenizer;
pub mod trainer;
pub mod types;
pub mod vocab;

#[cfg(feature = "python")]
mod python;

pub use error::{
    DecodeError, EncodeError, ErrorMode, LoadError, ModelError, TokenizerError, TrainError,
};
pub use model::{MODEL_FORMAT_VERSION, Model, cl100k_special_tokens};
pub use pretokenizer::{CL100K_BASE_PATTERN, GPT2_PATTERN, Pretokenizer};
pub use session::{Session, VocabularySource};
pub use tokenizer::Tokenizer;
pub use trainer::{BpeTrainer, TrainerConfig, train};
pub use types::{BASE_VOCAB_SIZE, MergeRank, MergeRule, Token, TokenPair};
pub use vocab::Vocabulary;
