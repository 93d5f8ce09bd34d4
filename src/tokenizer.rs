//! The public encode/decode front end.
//!
//! Text is split by the [`Pretokenizer`], every chunk's bytes are merged by
//! rank against the shared [`Vocabulary`], and registered special tokens can
//! optionally be cut out first. Batch methods fan out over Rayon.

use std::{path::Path, sync::Arc};

use indicatif::ParallelProgressIterator;
use rayon::prelude::*;

use crate::{
    decoder,
    encoder::encode_chunk,
    error::{DecodeError, EncodeError, ErrorMode, LoadError},
    model::Model,
    pretokenizer::{Pretokenizer, Segment, SpecialMatcher},
    progress::progress_bar,
    types::Token,
    vocab::Vocabulary,
};

/// Byte-level BPE tokenizer over an immutable vocabulary.
///
/// Combines a compiled split pattern with an immutable [`Vocabulary`].
/// All methods take `&self`; one tokenizer can serve any number of threads.
///
/// # Example
///
/// ```
/// use bytebpe::{Tokenizer, Vocabulary, CL100K_BASE_PATTERN};
///
/// let tokenizer = Tokenizer::new(Vocabulary::base(), CL100K_BASE_PATTERN).unwrap();
/// let ids = tokenizer.encode("hi").unwrap();
/// assert_eq!(ids, vec![104, 105]);
/// assert_eq!(tokenizer.decode(&ids).unwrap(), "hi");
/// ```
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Arc<Vocabulary>,
    pretokenizer: Pretokenizer,
    specials: Option<SpecialMatcher>,
}

impl Tokenizer {
    /// Creates a tokenizer from a vocabulary and a regex split pattern.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidPattern`] if `pattern` fails to compile.
    pub fn new(vocab: Vocabulary, pattern: &str) -> Result<Self, LoadError> {
        let pretokenizer = Pretokenizer::new(pattern)?;
        let specials = SpecialMatcher::new(
            vocab
                .special_tokens()
                .iter()
                .map(|(name, &id)| (name.as_str(), id)),
        )?;

        Ok(Self {
            vocab: Arc::new(vocab),
            pretokenizer,
            specials,
        })
    }

    /// Creates a tokenizer from a trained or loaded model.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidPattern`] if the model's pattern fails to compile.
    pub fn from_model(model: Model) -> Result<Self, LoadError> {
        let (pattern, vocab) = model.into_parts();
        Self::new(vocab, &pattern)
    }

    /// Loads a JSON model file.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Model::load`] or [`Tokenizer::from_model`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::from_model(Model::load(path)?)
    }

    /// Loads a tiktoken rank file with an explicit pattern and special tokens.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Model::from_tiktoken_file`] or [`Tokenizer::from_model`].
    pub fn from_tiktoken_file(
        path: impl AsRef<Path>,
        pattern: &str,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, LoadError> {
        Self::from_model(Model::from_tiktoken_file(path, pattern, special_tokens)?)
    }

    /// Loads `cl100k_base.tiktoken` with its pattern and special tokens.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Model::cl100k`].
    pub fn cl100k(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::from_model(Model::cl100k(path)?)
    }

    /// Encodes a text string.
    ///
    /// Special-token strings get no special treatment and are encoded as
    /// ordinary text.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails during
    /// text splitting (e.g. backtracking limit exceeded).
    pub fn encode(&self, text: &str) -> Result<Vec<Token>, EncodeError> {
        // pre-allocate: on average, BPE compresses text by 30-40%
        let mut tokens = Vec::with_capacity(text.len() / 3);
        self.encode_into(text, &mut tokens)?;
        Ok(tokens)
    }

    /// Encodes arbitrary bytes.
    ///
    /// Valid UTF-8 runs go through the regular pipeline; each maximal run of
    /// invalid bytes is encoded as a chunk of its own.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Vec<Token>, EncodeError> {
        let mut tokens = Vec::with_capacity(bytes.len() / 3);
        // adjacent invalid pieces form one chunk
        let mut invalid: Vec<u8> = Vec::new();
        for chunk in bytes.utf8_chunks() {
            if !chunk.valid().is_empty() {
                encode_chunk(&self.vocab, &invalid, &mut tokens);
                invalid.clear();
                self.encode_into(chunk.valid(), &mut tokens)?;
            }
            invalid.extend_from_slice(chunk.invalid());
        }
        encode_chunk(&self.vocab, &invalid, &mut tokens);
        Ok(tokens)
    }

    /// Encode a single text string with special token handling.
    ///
    /// Registered special tokens are matched literally and emitted as single
    /// token IDs; surrounding text passes through the regular pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails.
    pub fn encode_with_special(&self, text: &str) -> Result<Vec<Token>, EncodeError> {
        let Some(matcher) = &self.specials else {
            return self.encode(text);
        };

        let mut tokens = Vec::with_capacity(text.len() / 3);
        for segment in matcher.segments(text)? {
            match segment {
                Segment::Special(_, id) => tokens.push(id),
                Segment::Text(span) => self.encode_into(span, &mut tokens)?,
            }
        }
        Ok(tokens)
    }

    /// Encode many texts in parallel using Rayon.
    ///
    /// # Arguments
    ///
    /// * `texts` - Slice of text strings to encode.
    /// * `show_progress` - Whether to display a progress bar during encoding.
    ///
    /// # Returns
    ///
    /// Vector of token sequences in the same order as input texts.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails during text
    /// splitting, or [`EncodeError::ProgressBarSetup`] if the progress bar template
    /// fails to compile.
    pub fn encode_batch(
        &self,
        texts: &[&str],
        show_progress: bool,
    ) -> Result<Vec<Vec<Token>>, EncodeError> {
        let pb = progress_bar(texts.len() as u64, "Encoding texts", show_progress)?;

        texts
            .par_iter()
            .progress_with(pb)
            .map(|text| self.encode(text))
            .collect()
    }

    /// Parallel [`Tokenizer::encode_with_special`].
    ///
    /// # Errors
    ///
    /// Same as [`Tokenizer::encode_batch`].
    pub fn encode_with_special_batch(
        &self,
        texts: &[&str],
        show_progress: bool,
    ) -> Result<Vec<Vec<Token>>, EncodeError> {
        let pb = progress_bar(texts.len() as u64, "Encoding texts (st)", show_progress)?;

        texts
            .par_iter()
            .progress_with(pb)
            .map(|text| self.encode_with_special(text))
            .collect()
    }

    /// Parallel [`Tokenizer::encode_bytes`].
    ///
    /// # Errors
    ///
    /// Same as [`Tokenizer::encode_batch`].
    pub fn encode_bytes_batch(
        &self,
        inputs: &[&[u8]],
        show_progress: bool,
    ) -> Result<Vec<Vec<Token>>, EncodeError> {
        let pb = progress_bar(inputs.len() as u64, "Encoding bytes", show_progress)?;

        inputs
            .par_iter()
            .progress_with(pb)
            .map(|bytes| self.encode_bytes(bytes))
            .collect()
    }

    /// Decodes a token sequence, replacing invalid UTF-8 with U+FFFD.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not in the vocabulary.
    pub fn decode(&self, tokens: &[Token]) -> Result<String, DecodeError> {
        self.decode_with(tokens, ErrorMode::Replace)
    }

    /// Decodes a token sequence back into a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
    /// vocabulary, or [`DecodeError::InvalidUtf8`] if the decoded bytes are not
    /// valid UTF-8 (only in `Strict` mode).
    pub fn decode_with(&self, tokens: &[Token], errors: ErrorMode) -> Result<String, DecodeError> {
        decoder::decode_text(&self.vocab, tokens, errors)
    }

    /// Decodes a token sequence to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not in the vocabulary.
    pub fn decode_bytes(&self, tokens: &[Token]) -> Result<Vec<u8>, DecodeError> {
        decoder::decode_bytes(&self.vocab, tokens)
    }

    /// Decodes multiple token sequences in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
    /// vocabulary, [`DecodeError::InvalidUtf8`] if the decoded bytes are not valid
    /// UTF-8 (only in `Strict` mode), or [`DecodeError::ProgressBarSetup`] if the
    /// progress bar template fails to compile.
    pub fn decode_batch(
        &self,
        token_seqs: &[&[Token]],
        errors: ErrorMode,
        show_progress: bool,
    ) -> Result<Vec<String>, DecodeError> {
        let pb = progress_bar(token_seqs.len() as u64, "Decoding tokens", show_progress)?;

        token_seqs
            .par_iter()
            .progress_with(pb)
            .map(|tokens| self.decode_with(tokens, errors))
            .collect()
    }

    /// Total number of tokens, specials included.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// The underlying vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Source text of the split pattern.
    pub fn pattern(&self) -> &str {
        self.pretokenizer.pattern()
    }

    /// Snapshot of this tokenizer as a [`Model`].
    pub fn to_model(&self) -> Model {
        Model::new(self.pattern(), Vocabulary::clone(&self.vocab))
    }

    /// Writes this tokenizer as a JSON model.
    ///
    /// # Errors
    ///
    /// Same as [`Model::save`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        self.to_model().save(path)
    }

    fn encode_into(&self, text: &str, tokens: &mut Vec<Token>) -> Result<(), EncodeError> {
        self.pretokenizer
            .for_each_chunk(text, |chunk| encode_chunk(&self.vocab, chunk.as_bytes(), tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pretokenizer::CL100K_BASE_PATTERN, types::MergeRule};

    fn make_tokenizer(merges: &[((Token, Token), Token)], pat: &str) -> Tokenizer {
        let vocab = Vocabulary::from_merges(merges.iter().copied().map(MergeRule::from), [])
            .expect("vocab init failed");
        Tokenizer::new(vocab, pat).expect("pattern failed to compile")
    }

    fn with_specials(specials: &[(&str, Token)]) -> Tokenizer {
        let vocab = Vocabulary::from_merges(
            [MergeRule::new(104, 105, 256)],
            specials.iter().map(|&(s, id)| (s.to_string(), id)),
        )
        .expect("vocab init failed");
        Tokenizer::new(vocab, CL100K_BASE_PATTERN).expect("pattern failed to compile")
    }

    #[test]
    fn test_encode_text_no_merges() {
        let tok = make_tokenizer(&[], r"\S+");
        // No merges → raw UTF-8 bytes
        assert_eq!(tok.encode("ab cd").unwrap(), vec![97, 98, 99, 100]);
    }

    #[test]
    fn test_encode_hi_round_trip() {
        let tok = make_tokenizer(&[], CL100K_BASE_PATTERN);
        let ids = tok.encode("hi").unwrap();
        assert_eq!(ids, vec![104, 105]);
        assert_eq!(tok.decode(&ids).unwrap(), "hi");
    }

    #[test]
    fn test_encode_text_with_merges() {
        let tok = make_tokenizer(&[((97, 98), 256)], r"\S+");
        // "ab" → [256], "cd" → [99, 100]
        assert_eq!(tok.encode("ab cd").unwrap(), vec![256, 99, 100]);
    }

    #[test]
    fn test_merges_do_not_cross_chunks() {
        // " b" would merge, but "a" and " b" are separate chunks
        let tok = make_tokenizer(&[((97, 32), 256)], CL100K_BASE_PATTERN);
        assert_eq!(tok.encode("a b").unwrap(), vec![97, 32, 98]);
    }

    #[test]
    fn test_empty_text() {
        let tok = make_tokenizer(&[], CL100K_BASE_PATTERN);
        assert!(tok.encode("").unwrap().is_empty());
        assert!(tok.encode_bytes(b"").unwrap().is_empty());
        assert!(tok.encode_with_special("").unwrap().is_empty());
        assert_eq!(tok.decode(&[]).unwrap(), "");
    }

    #[test]
    fn test_unicode_bytes() {
        // 'é' is U+00E9, encoded as [0xC3, 0xA9] in UTF-8
        let tok = make_tokenizer(&[((0xC3, 0xA9), 256)], r"\S+");
        assert_eq!(tok.encode("é").unwrap(), vec![256]);
    }

    #[test]
    fn test_lookahead_pattern() {
        let tok = make_tokenizer(&[], r"\s+(?!\S)|\S+|\s+");
        let result = tok.encode("hello world").unwrap();
        assert_eq!(
            result,
            vec![104, 101, 108, 108, 111, 32, 119, 111, 114, 108, 100]
        );
    }

    #[test]
    fn test_encode_bytes_invalid_utf8() {
        let tok = make_tokenizer(&[((0xFF, 0xFE), 256), ((104, 105), 257)], CL100K_BASE_PATTERN);
        let input = [b'h', b'i', 0xFF, 0xFE, b'h', b'i'];
        let ids = tok.encode_bytes(&input).unwrap();
        assert_eq!(ids, vec![257, 256, 257]);
        assert_eq!(tok.decode_bytes(&ids).unwrap(), input);
        assert_eq!(tok.decode(&ids).unwrap(), "hi\u{FFFD}\u{FFFD}hi");
    }

    #[test]
    fn test_encode_bytes_matches_encode_for_text() {
        let tok = make_tokenizer(&[((104, 105), 256)], CL100K_BASE_PATTERN);
        let text = "hi there, hi!";
        assert_eq!(tok.encode_bytes(text.as_bytes()).unwrap(), tok.encode(text).unwrap());
    }

    #[test]
    fn test_special_tokens_ignored_by_plain_encode() {
        let tok = with_specials(&[("<|endoftext|>", 300)]);
        let ids = tok.encode("hi<|endoftext|>").unwrap();
        assert!(!ids.contains(&300));
        assert_eq!(tok.decode(&ids).unwrap(), "hi<|endoftext|>");
    }

    #[test]
    fn test_encode_with_special() {
        let tok = with_specials(&[("<|endoftext|>", 300), ("<|pad|>", 301)]);
        let ids = tok.encode_with_special("hi<|endoftext|><|pad|>hi").unwrap();
        assert_eq!(ids, vec![256, 300, 301, 256]);
        assert_eq!(tok.decode(&ids).unwrap(), "hi<|endoftext|><|pad|>hi");
    }

    #[test]
    fn test_encode_batch_parallel() {
        let tok = make_tokenizer(&[((97, 98), 256)], r"\S+");
        let results = tok.encode_batch(&["ab", "cd", "ab"], false).unwrap();
        assert_eq!(results, vec![vec![256], vec![99, 100], vec![256]]);

        let inputs: [&[u8]; 2] = [b"ab", b"cd"];
        let results = tok.encode_bytes_batch(&inputs, false).unwrap();
        assert_eq!(results, vec![vec![256], vec![99, 100]]);
    }

    #[test]
    fn test_encode_with_special_batch() {
        let tok = with_specials(&[("<|endoftext|>", 300)]);
        let results = tok
            .encode_with_special_batch(&["hi<|endoftext|>", "<|endoftext|>"], false)
            .unwrap();
        assert_eq!(results, vec![vec![256, 300], vec![300]]);
    }

    #[test]
    fn test_decode_tokens_batch_strict() {
        let tok = make_tokenizer(&[((97, 98), 256)], r"\S+");
        let seq1 = vec![256];
        let seq2 = vec![99, 100];
        let token_seqs: Vec<&[Token]> = vec![&seq1, &seq2];
        let decoded = tok
            .decode_batch(&token_seqs, ErrorMode::Strict, false)
            .unwrap();
        assert_eq!(decoded, vec!["ab", "cd"]);
    }

    #[test]
    fn test_decode_unknown_token_errors() {
        let tok = make_tokenizer(&[((97, 98), 256)], r"\S+");
        let result = tok.decode(&[97, 9999]);
        assert!(matches!(result, Err(DecodeError::UnknownToken(9999))));
    }

    #[test]
    fn test_vocab_size() {
        let tok = make_tokenizer(&[((97, 98), 256), ((256, 99), 257)], r"\S+");
        assert_eq!(tok.vocab_size(), 258);
        assert_eq!(with_specials(&[("<|endoftext|>", 300)]).vocab_size(), 258);
    }

    #[test]
    fn test_invalid_pattern() {
        let result = Tokenizer::new(Vocabulary::base(), "(");
        assert!(matches!(result, Err(LoadError::InvalidPattern(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tok.json");
        let tok = with_specials(&[("<|endoftext|>", 300)]);
        tok.save(&path).unwrap();

        let reloaded = Tokenizer::load(&path).unwrap();
        let text = "hi there<|endoftext|>";
        assert_eq!(reloaded.pattern(), tok.pattern());
        assert_eq!(
            reloaded.encode_with_special(text).unwrap(),
            tok.encode_with_special(text).unwrap()
        );
    }

    #[test]
    fn test_tokenizer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tokenizer>();
    }
}
