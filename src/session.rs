//! Host-facing tokenizer lifecycle: `init`, then `encode`/`decode`.
//!
//! A [`Session`] starts empty. Encoding or decoding before a successful
//! [`Session::init`] reports [`TokenizerError::Uninitialized`]. Training does
//! not need an initialized session.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
};

use crate::{
    error::TokenizerError,
    model::Model,
    pretokenizer::CL100K_BASE_PATTERN,
    tokenizer::Tokenizer,
    trainer,
    types::Token,
};

/// Where [`Session::init`] gets its vocabulary from.
#[derive(Debug, Clone)]
pub enum VocabularySource {
    /// A JSON model written by [`Model::save`].
    ModelFile(PathBuf),
    /// A tiktoken rank file plus the pattern and specials that go with it.
    Tiktoken {
        path: PathBuf,
        pattern: String,
        special_tokens: BTreeMap<String, Token>,
    },
    /// An in-memory model, e.g. fresh from training.
    Model(Model),
}

impl VocabularySource {
    /// `cl100k_base.tiktoken` at `path`, with the cl100k pattern and special tokens.
    pub fn cl100k(path: impl Into<PathBuf>) -> Self {
        Self::Tiktoken {
            path: path.into(),
            pattern: CL100K_BASE_PATTERN.to_string(),
            special_tokens: crate::model::cl100k_special_tokens(),
        }
    }
}

/// An explicit tokenizer handle with an init-before-use lifecycle.
#[derive(Debug, Clone, Default)]
pub struct Session {
    tokenizer: Option<Arc<Tokenizer>>,
}

impl Session {
    /// An uninitialized session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a vocabulary and makes the session ready.
    ///
    /// On failure the session keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Load`] if the source cannot be read or is malformed.
    pub fn init(&mut self, source: VocabularySource) -> Result<(), TokenizerError> {
        let tokenizer = match source {
            VocabularySource::ModelFile(path) => Tokenizer::load(path)?,
            VocabularySource::Tiktoken {
                path,
                pattern,
                special_tokens,
            } => Tokenizer::from_tiktoken_file(path, &pattern, special_tokens)?,
            VocabularySource::Model(model) => Tokenizer::from_model(model)?,
        };
        log::info!(
            "session initialized with {} tokens",
            tokenizer.vocab_size()
        );
        self.tokenizer = Some(Arc::new(tokenizer));
        Ok(())
    }

    /// Whether [`Session::init`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.tokenizer.is_some()
    }

    /// The loaded tokenizer.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Uninitialized`] before a successful `init`.
    pub fn tokenizer(&self) -> Result<&Tokenizer, TokenizerError> {
        self.tokenizer
            .as_deref()
            .ok_or(TokenizerError::Uninitialized)
    }

    /// A shared handle to the loaded tokenizer, for use on other threads.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Uninitialized`] before a successful `init`.
    pub fn shared(&self) -> Result<Arc<Tokenizer>, TokenizerError> {
        self.tokenizer
            .clone()
            .ok_or(TokenizerError::Uninitialized)
    }

    /// Encodes `text` to token ids.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Uninitialized`] before `init`, or
    /// [`TokenizerError::Encode`] if splitting fails.
    pub fn encode(&self, text: &str) -> Result<Vec<Token>, TokenizerError> {
        Ok(self.tokenizer()?.encode(text)?)
    }

    /// Decodes token ids to text, replacing invalid UTF-8 with U+FFFD.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Uninitialized`] before `init`, or
    /// [`TokenizerError::Decode`] for an unknown id.
    pub fn decode(&self, tokens: &[Token]) -> Result<String, TokenizerError> {
        Ok(self.tokenizer()?.decode(tokens)?)
    }

    /// Trains a model of `vocab_size` tokens on `corpus` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Train`] on invalid parameters or failure.
    pub fn train<S: AsRef<str> + Sync>(
        corpus: &[S],
        vocab_size: usize,
    ) -> Result<Model, TokenizerError> {
        Ok(trainer::train(corpus, vocab_size)?)
    }
}
