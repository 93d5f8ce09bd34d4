//! Type aliases and shared types for BPE training, encoding and decoding.
//!
//! These type aliases provide semantic clarity throughout the codebase.

use serde::{Deserialize, Serialize};

/// Represents a token identifier in the vocabulary.
///
/// Ids `0..256` are the single-byte base tokens, followed by tokens produced
/// by merges. Special tokens sit above the mergeable id space.
pub type Token = usize;

/// Position of a part in a working token sequence.
pub(crate) type TextIdx = usize;

/// Frequency count for token pairs and words during training.
pub type TokenFreq = usize;

/// Merge rank indicates when a merge rule was learned during training.
///
/// Lower values represent earlier merges (e.g., 0 = first merge, 1 = second merge)
/// and are applied first when encoding.
pub type MergeRank = usize;

/// A sequence of raw bytes.
pub type ByteSeq = Vec<u8>;

/// Number of single-byte base tokens every vocabulary starts with.
pub const BASE_VOCAB_SIZE: usize = 256;

/// A pair of adjacent tokens.
///
/// Used as a key for looking up merge rules during encoding and for
/// tracking pair frequencies during training. Pairs order lexicographically
/// on `(left, right)`, which is the training tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenPair(pub Token, pub Token);

/// A learned merge: `(left, right) -> merged`.
///
/// The rank of a rule is its position in the merge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeRule {
    /// Left constituent id.
    pub left: Token,
    /// Right constituent id.
    pub right: Token,
    /// Id of the token produced by the merge.
    pub merged: Token,
}

impl MergeRule {
    /// Creates a merge rule.
    pub fn new(left: Token, right: Token, merged: Token) -> Self {
        Self {
            left,
            right,
            merged,
        }
    }

    /// The constituent pair of this rule.
    pub fn pair(&self) -> TokenPair {
        TokenPair(self.left, self.right)
    }
}

impl From<((Token, Token), Token)> for MergeRule {
    fn from(((left, right), merged): ((Token, Token), Token)) -> Self {
        Self::new(left, right, merged)
    }
}
