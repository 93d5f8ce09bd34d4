//! Python bindings, built with the `python` feature.

use std::{collections::BTreeMap, path::PathBuf};

use pyo3::{exceptions::PyValueError, prelude::*};

use crate::{
    error::ErrorMode,
    pretokenizer::CL100K_BASE_PATTERN,
    session::{Session, VocabularySource},
    trainer::{BpeTrainer, TrainerConfig},
    types::Token,
};

fn to_py_err(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Python wrapper for a tokenizer session.
#[pyclass(name = "Tokenizer")]
#[derive(Default)]
pub struct PyTokenizer {
    session: Session,
}

#[pymethods]
impl PyTokenizer {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON model file.
    fn init(&mut self, vocab_path: PathBuf) -> PyResult<()> {
        self.session
            .init(VocabularySource::ModelFile(vocab_path))
            .map_err(to_py_err)
    }

    /// Loads a tiktoken rank file.
    #[pyo3(signature = (path, pattern=None, special_tokens=None))]
    fn init_tiktoken(
        &mut self,
        path: PathBuf,
        pattern: Option<String>,
        special_tokens: Option<BTreeMap<String, Token>>,
    ) -> PyResult<()> {
        let source = VocabularySource::Tiktoken {
            path,
            pattern: pattern.unwrap_or_else(|| CL100K_BASE_PATTERN.to_string()),
            special_tokens: special_tokens.unwrap_or_default(),
        };
        self.session.init(source).map_err(to_py_err)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }

    #[pyo3(signature = (text, allow_special=false))]
    fn encode(&self, text: &str, allow_special: bool) -> PyResult<Vec<Token>> {
        let tokenizer = self.session.tokenizer().map_err(to_py_err)?;
        if allow_special {
            tokenizer.encode_with_special(text).map_err(to_py_err)
        } else {
            tokenizer.encode(text).map_err(to_py_err)
        }
    }

    #[pyo3(signature = (texts, show_progress=false))]
    fn encode_batch(&self, texts: Vec<String>, show_progress: bool) -> PyResult<Vec<Vec<Token>>> {
        let tokenizer = self.session.tokenizer().map_err(to_py_err)?;
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        tokenizer
            .encode_batch(&texts, show_progress)
            .map_err(to_py_err)
    }

    /// Decodes ids; `errors` is "strict" or "replace".
    #[pyo3(signature = (tokens, errors="replace"))]
    fn decode(&self, tokens: Vec<Token>, errors: &str) -> PyResult<String> {
        let mode: ErrorMode = errors.parse().map_err(PyValueError::new_err)?;
        let tokenizer = self.session.tokenizer().map_err(to_py_err)?;
        tokenizer.decode_with(&tokens, mode).map_err(to_py_err)
    }

    /// Trains on `corpus` and replaces the loaded vocabulary with the result.
    #[pyo3(signature = (corpus, vocab_size, special_tokens=None, min_frequency=2, show_progress=false))]
    fn train(
        &mut self,
        corpus: Vec<String>,
        vocab_size: usize,
        special_tokens: Option<Vec<String>>,
        min_frequency: usize,
        show_progress: bool,
    ) -> PyResult<()> {
        let config = TrainerConfig::new(vocab_size)
            .with_special_tokens(special_tokens.unwrap_or_default())
            .with_min_frequency(min_frequency)
            .with_progress(show_progress);
        let mut trainer = BpeTrainer::new(config).map_err(to_py_err)?;
        trainer.feed(&corpus).map_err(to_py_err)?;
        let model = trainer.train().map_err(to_py_err)?;
        self.session
            .init(VocabularySource::Model(model))
            .map_err(to_py_err)
    }

    /// Writes the loaded vocabulary as a JSON model.
    fn save(&self, path: PathBuf) -> PyResult<()> {
        let tokenizer = self.session.tokenizer().map_err(to_py_err)?;
        tokenizer.save(path).map_err(to_py_err)
    }

    fn vocab_size(&self) -> PyResult<usize> {
        Ok(self.session.tokenizer().map_err(to_py_err)?.vocab_size())
    }
}

#[pymodule]
fn bytebpe(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenizer>()?;
    Ok(())
}
