//! Pre-tokenization: splitting text into chunks before byte-level BPE.
//!
//! Chunks are produced by a regex with leftmost-first alternation and
//! backtracking lookahead. BPE merges never cross a chunk boundary.

use fancy_regex::Regex;

use crate::{error::EncodeError, types::Token};

/// cl100k_base split pattern (GPT-4, GPT-3.5-turbo).
///
/// The `\s+(?!\S)` alternative leaves the last whitespace character of a run
/// for the next chunk (so `"a   b"` splits as `"a"`, `"  "`, `" b"`), while a
/// whitespace run at end of text stays whole.
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// GPT-2 split pattern.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Regex-driven text splitter.
#[derive(Debug, Clone)]
pub struct Pretokenizer {
    pattern: Regex,
}

impl Pretokenizer {
    /// Compiles a split pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error if `pattern` is invalid.
    pub fn new(pattern: &str) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// The cl100k_base splitter.
    pub fn cl100k() -> Result<Self, fancy_regex::Error> {
        Self::new(CL100K_BASE_PATTERN)
    }

    /// Source text of the split pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Splits `text` into chunks, in order.
    ///
    /// The chunks concatenate back to `text` whenever the pattern matches
    /// every character, which holds for the built-in patterns.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails
    /// (e.g. backtracking limit exceeded).
    pub fn split<'t>(&self, text: &'t str) -> Result<Vec<&'t str>, EncodeError> {
        let mut chunks = Vec::new();
        self.for_each_chunk(text, |chunk| chunks.push(chunk))?;
        Ok(chunks)
    }

    /// Calls `f` for every non-empty chunk of `text`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the regex engine fails.
    pub fn for_each_chunk<'t>(
        &self,
        text: &'t str,
        mut f: impl FnMut(&'t str),
    ) -> Result<(), EncodeError> {
        for mat in self.pattern.find_iter(text) {
            let chunk = mat?.as_str();
            if !chunk.is_empty() {
                f(chunk);
            }
        }
        Ok(())
    }
}

/// A span of input text: either ordinary text or a special token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'t> {
    /// Text to run through the pre-tokenizer and BPE.
    Text(&'t str),
    /// A literal special token and its id.
    Special(&'t str, Token),
}

/// Finds literal special-token occurrences in text.
///
/// Longer tokens win when one special token is a prefix of another.
#[derive(Debug, Clone)]
pub struct SpecialMatcher {
    pattern: Regex,
    tokens: Vec<(String, Token)>,
}

impl SpecialMatcher {
    /// Builds a matcher for the given special tokens.
    ///
    /// Returns `Ok(None)` when there are no special tokens.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error if the escaped alternation fails to compile.
    pub fn new<'a>(
        special_tokens: impl IntoIterator<Item = (&'a str, Token)>,
    ) -> Result<Option<Self>, fancy_regex::Error> {
        let mut tokens: Vec<(String, Token)> = special_tokens
            .into_iter()
            .filter(|(s, _)| !s.is_empty())
            .map(|(s, id)| (s.to_string(), id))
            .collect();
        if tokens.is_empty() {
            return Ok(None);
        }
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        // escape regex metachars in special tokens to avoid
        // undesired pattern match behavior.
        let pattern = tokens
            .iter()
            .map(|(s, _)| fancy_regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Some(Self {
            pattern: Regex::new(&pattern)?,
            tokens,
        }))
    }

    /// Segments text into alternating normal and special-token spans.
    ///
    /// Empty normal spans (text starting with a special token, or two
    /// consecutive special tokens) are not emitted.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if a match error occurs during scanning.
    pub fn segments<'t>(&self, text: &'t str) -> Result<Vec<Segment<'t>>, EncodeError> {
        let mut segments = Vec::new();
        let mut segment_start = 0;

        for mat in self.pattern.find_iter(text) {
            let mat = mat?;
            if mat.start() > segment_start {
                // push normal segment first to preserve ordering
                segments.push(Segment::Text(&text[segment_start..mat.start()]));
            }
            let special = mat.as_str();
            if let Some(id) = self.id_of(special) {
                segments.push(Segment::Special(special, id));
            }
            segment_start = mat.end();
        }
        // add normal segment after last special token
        if segment_start < text.len() {
            segments.push(Segment::Text(&text[segment_start..]));
        }

        Ok(segments)
    }

    /// Returns the ordinary text spans with special tokens cut out.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if a match error occurs during scanning.
    pub fn text_spans<'t>(&self, text: &'t str) -> Result<Vec<&'t str>, EncodeError> {
        Ok(self
            .segments(text)?
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Text(s) => Some(s),
                Segment::Special(..) => None,
            })
            .collect())
    }

    fn id_of(&self, special: &str) -> Option<Token> {
        self.tokens
            .iter()
            .find(|(s, _)| s == special)
            .map(|&(_, id)| id)
    }
}
