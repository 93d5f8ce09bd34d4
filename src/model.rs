//! Persisted tokenizer models.
//!
//! A [`Model`] is the pre-tokenizer pattern plus a validated [`Vocabulary`].
//! Models are written as versioned JSON with base64 byte sequences, and can
//! also be imported from tiktoken `*.tiktoken` rank files.

use std::{collections::BTreeMap, fs, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{
    error::LoadError,
    pretokenizer::CL100K_BASE_PATTERN,
    types::{ByteSeq, MergeRule, Token},
    vocab::{self, Vocabulary},
};

/// Current on-disk model format version.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Special tokens shipped with the `cl100k_base` vocabulary.
pub fn cl100k_special_tokens() -> BTreeMap<String, Token> {
    [
        ("<|endoftext|>", 100257),
        ("<|fim_prefix|>", 100258),
        ("<|fim_middle|>", 100259),
        ("<|fim_suffix|>", 100260),
        ("<|endofprompt|>", 100276),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), id))
    .collect()
}

/// A pre-tokenizer pattern together with its vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pattern: String,
    vocab: Vocabulary,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    version: u32,
    pattern: String,
    vocab: Vec<TokenEntry>,
    merges: Vec<MergeRule>,
    #[serde(default)]
    special_tokens: BTreeMap<String, Token>,
    /// Set for vocabularies imported from tiktoken rank files.
    #[serde(default)]
    whole_chunk_lookup: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenEntry {
    id: Token,
    /// Standard base64.
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Model {
    /// Pairs a pattern with a vocabulary.
    pub fn new(pattern: impl Into<String>, vocab: Vocabulary) -> Self {
        Self {
            pattern: pattern.into(),
            vocab,
        }
    }

    /// The pre-tokenizer pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Splits the model into its pattern and vocabulary.
    pub fn into_parts(self) -> (String, Vocabulary) {
        (self.pattern, self.vocab)
    }

    /// Serializes the model to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, LoadError> {
        let file = ModelFile {
            version: MODEL_FORMAT_VERSION,
            pattern: self.pattern.clone(),
            vocab: self
                .vocab
                .tokens()
                .iter()
                .enumerate()
                .map(|(id, bytes)| TokenEntry {
                    id,
                    bytes: STANDARD.encode(bytes),
                })
                .collect(),
            merges: self.vocab.merges().to_vec(),
            special_tokens: self.vocab.special_tokens().clone(),
            whole_chunk_lookup: self.vocab.whole_chunk_lookup(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Parses and validates a model from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnsupportedVersion`] for an unknown format version,
    /// [`LoadError::Json`] or [`LoadError::Base64`] for a malformed document,
    /// or [`LoadError::Malformed`] if the vocabulary fails validation.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let probe: VersionProbe = serde_json::from_str(json)?;
        if probe.version != MODEL_FORMAT_VERSION {
            return Err(LoadError::UnsupportedVersion(probe.version));
        }

        let file: ModelFile = serde_json::from_str(json)?;
        let entries = file
            .vocab
            .into_iter()
            .map(|entry| -> Result<(Token, ByteSeq), LoadError> {
                Ok((entry.id, STANDARD.decode(entry.bytes)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tokens = vocab::order_by_id(entries)?;
        let vocab = Vocabulary::new(tokens, file.merges, file.special_tokens)?
            .with_whole_chunk_lookup(file.whole_chunk_lookup);

        Ok(Self::new(file.pattern, vocab))
    }

    /// Writes the model as JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        log::info!(
            "saved model with {} tokens to {}",
            self.vocab.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads a JSON model from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] if the file cannot be read, or any error
    /// from [`Model::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let model = Self::from_json(&fs::read_to_string(path)?)?;
        log::info!(
            "loaded model with {} tokens and {} merges from {}",
            model.vocab.len(),
            model.vocab.num_merges(),
            path.display()
        );
        Ok(model)
    }

    /// Builds a model from tiktoken rank-file contents.
    ///
    /// # Arguments
    ///
    /// * `data` - Lines of `<base64 bytes> <rank>`.
    /// * `pattern` - Pre-tokenizer pattern to pair with the ranks.
    /// * `special_tokens` - Special token name → id.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Parse`] or [`LoadError::Base64`] for a bad line,
    /// or [`LoadError::Malformed`] if the ranks do not form a valid vocabulary.
    pub fn from_tiktoken(
        data: &str,
        pattern: impl Into<String>,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, LoadError> {
        let ranks = parse_tiktoken(data)?;
        let vocab = Vocabulary::from_ranks(ranks, special_tokens)?;
        Ok(Self::new(pattern, vocab))
    }

    /// Reads a tiktoken rank file from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] if the file cannot be read, or any error
    /// from [`Model::from_tiktoken`].
    pub fn from_tiktoken_file(
        path: impl AsRef<Path>,
        pattern: impl Into<String>,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let model = Self::from_tiktoken(&fs::read_to_string(path)?, pattern, special_tokens)?;
        log::info!(
            "imported {} ranks from {}",
            model.vocab.num_mergeable(),
            path.display()
        );
        Ok(model)
    }

    /// Reads a `cl100k_base.tiktoken` file with the cl100k pattern and special tokens.
    ///
    /// # Errors
    ///
    /// Same as [`Model::from_tiktoken_file`].
    pub fn cl100k(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::from_tiktoken_file(path, CL100K_BASE_PATTERN, cl100k_special_tokens())
    }
}

/// Parses `<base64> <rank>` lines. Blank lines are skipped.
fn parse_tiktoken(data: &str) -> Result<Vec<(ByteSeq, Token)>, LoadError> {
    let mut ranks = Vec::new();
    for (idx, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse_err = |reason: &str| LoadError::Parse {
            line: idx + 1,
            reason: reason.to_string(),
        };

        let mut fields = line.split_whitespace();
        let (Some(encoded), Some(rank), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(parse_err("expected `<base64> <rank>`"));
        };
        let rank = rank
            .parse::<Token>()
            .map_err(|e| parse_err(&e.to_string()))?;
        ranks.push((STANDARD.decode(encoded)?, rank));
    }
    Ok(ranks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    fn small_model() -> Model {
        let vocab = Vocabulary::from_merges(
            [MergeRule::new(104, 105, 256), MergeRule::new(32, 256, 257)],
            [(String::from("<|endoftext|>"), 258)],
        )
        .unwrap();
        Model::new(CL100K_BASE_PATTERN, vocab)
    }

    /// tiktoken lines for the 256 identity bytes plus extra tokens.
    fn tiktoken_data(extra: &[&[u8]]) -> String {
        (0..=u8::MAX)
            .map(|b| vec![b])
            .chain(extra.iter().map(|e| e.to_vec()))
            .enumerate()
            .map(|(rank, bytes)| format!("{} {rank}\n", STANDARD.encode(bytes)))
            .collect()
    }

    #[test]
    fn test_json_round_trip() {
        let model = small_model();
        let json = model.to_json().unwrap();
        assert!(json.contains("\"version\": 1"));
        assert!(json.contains("\"<|endoftext|>\": 258"));

        let reloaded = Model::from_json(&json).unwrap();
        assert_eq!(reloaded, model);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = small_model();
        model.save(&path).unwrap();
        assert_eq!(Model::load(&path).unwrap(), model);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Model::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let json = r#"{"version": 7, "pattern": "", "vocab": [], "merges": []}"#;
        assert!(matches!(
            Model::from_json(json),
            Err(LoadError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut json: serde_json::Value =
            serde_json::from_str(&small_model().to_json().unwrap()).unwrap();
        json["vocab"][1]["id"] = serde_json::json!(0);
        let err = Model::from_json(&json.to_string()).unwrap_err();
        assert!(matches!(err, LoadError::Malformed(ModelError::DuplicateId(0))));
    }

    #[test]
    fn test_unknown_merge_constituent_rejected() {
        let mut json: serde_json::Value =
            serde_json::from_str(&small_model().to_json().unwrap()).unwrap();
        json["merges"][1]["left"] = serde_json::json!(999);
        let err = Model::from_json(&json.to_string()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Malformed(ModelError::UnknownConstituent { rank: 1, id: 999 })
        ));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let mut json: serde_json::Value =
            serde_json::from_str(&small_model().to_json().unwrap()).unwrap();
        json["vocab"][0]["bytes"] = serde_json::json!("not base64!");
        let err = Model::from_json(&json.to_string()).unwrap_err();
        assert!(matches!(err, LoadError::Base64(_)));
    }

    #[test]
    fn test_from_tiktoken() {
        let data = tiktoken_data(&[b"hi", b" hi"]);
        let model = Model::from_tiktoken(&data, CL100K_BASE_PATTERN, []).unwrap();

        let vocab = model.vocab();
        assert_eq!(vocab.len(), 258);
        assert_eq!(vocab.byte_seq_to_id(b" hi"), Some(257));
        assert_eq!(vocab.merge(104, 105), Some((256, 0)));
        assert_eq!(vocab.merge(32, 256), Some((257, 1)));
    }

    #[test]
    fn test_whole_chunk_lookup_persisted() {
        assert!(!small_model().vocab().whole_chunk_lookup());

        let data = tiktoken_data(&[b"hi", b" hi"]);
        let model = Model::from_tiktoken(&data, CL100K_BASE_PATTERN, []).unwrap();
        assert!(model.vocab().whole_chunk_lookup());

        let reloaded = Model::from_json(&model.to_json().unwrap()).unwrap();
        assert!(reloaded.vocab().whole_chunk_lookup());
        assert_eq!(reloaded, model);
    }

    #[test]
    fn test_json_without_lookup_flag() {
        let mut json: serde_json::Value =
            serde_json::from_str(&small_model().to_json().unwrap()).unwrap();
        json.as_object_mut().unwrap().remove("whole_chunk_lookup");
        let model = Model::from_json(&json.to_string()).unwrap();
        assert!(!model.vocab().whole_chunk_lookup());
    }

    #[test]
    fn test_tiktoken_parse_errors() {
        let err = Model::from_tiktoken("aGk=\n", "", []).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 1, .. }));

        let err = Model::from_tiktoken("aGk= x\n", "", []).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 1, .. }));

        let err = Model::from_tiktoken("@@@ 0\n", "", []).unwrap_err();
        assert!(matches!(err, LoadError::Base64(_)));
    }

    #[test]
    fn test_tiktoken_orphan_rejected() {
        // "xyz" cannot be split into two existing tokens
        let data = tiktoken_data(&[b"xyz"]);
        let err = Model::from_tiktoken(&data, "", []).unwrap_err();
        assert!(matches!(err, LoadError::Malformed(ModelError::OrphanToken(256))));
    }

    #[test]
    fn test_cl100k_special_tokens() {
        let specials = cl100k_special_tokens();
        assert_eq!(specials.len(), 5);
        assert_eq!(specials["<|endoftext|>"], 100257);
        assert_eq!(specials["<|endofprompt|>"], 100276);
    }
}
