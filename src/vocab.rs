//! Vocabulary store: the id ↔ byte-sequence mapping plus merge-rank metadata.
//!
//! A [`Vocabulary`] is built once, either from a learned merge list, from a
//! tiktoken rank table, or from a persisted model, and is validated on
//! construction. After that it is immutable; every lookup is a pure read and
//! the type is `Send + Sync`, so one instance can back any number of
//! concurrent encode/decode calls.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    error::ModelError,
    types::{BASE_VOCAB_SIZE, ByteSeq, MergeRank, MergeRule, Token, TokenPair},
};

/// Immutable byte-level BPE vocabulary.
///
/// - `tokens[0..256]`: the single-byte base tokens, in any byte order.
/// - `tokens[256..]`: tokens produced by merges.
/// - special tokens: named ids above the mergeable range.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    /// Maps mergeable token ids to their byte sequences.
    tokens: Vec<ByteSeq>,

    /// Reverse lookup over mergeable and special tokens.
    ids: FxHashMap<ByteSeq, Token>,

    /// Base token id for each byte value.
    byte_table: [Token; BASE_VOCAB_SIZE],

    /// Merge rules in rank order.
    merges: Vec<MergeRule>,

    /// Maps token pairs to (merged_token, effective rank).
    ///
    /// Every rule producing the same token shares the rank of the earliest
    /// such rule.
    pair_ranks: FxHashMap<TokenPair, (Token, MergeRank)>,

    /// Special token name → id.
    special_tokens: BTreeMap<String, Token>,

    /// Special token id → literal bytes.
    special_bytes: FxHashMap<Token, ByteSeq>,

    /// Whether a chunk that is exactly one mergeable token encodes to it
    /// directly, skipping rank-ordered merging. Set for rank-table imports.
    whole_chunk_lookup: bool,
}

impl Vocabulary {
    /// Builds and validates a vocabulary from an explicit token table.
    ///
    /// # Arguments
    ///
    /// * `tokens` - Byte sequence for every mergeable id, indexed by id.
    ///   The first 256 entries must be the 256 distinct single bytes.
    /// * `merges` - Merge rules in rank order.
    /// * `special_tokens` - `(name, id)` pairs; ids must lie outside the
    ///   mergeable range.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] describing the first structural problem found.
    pub fn new(
        tokens: Vec<ByteSeq>,
        merges: Vec<MergeRule>,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, ModelError> {
        let byte_table = build_byte_table(&tokens)?;

        let mut ids: FxHashMap<ByteSeq, Token> = FxHashMap::default();
        ids.reserve(tokens.len());
        for (id, bytes) in tokens.iter().enumerate() {
            if bytes.is_empty() {
                return Err(ModelError::EmptyToken(id));
            }
            if let Some(&existing) = ids.get(bytes.as_slice()) {
                return Err(ModelError::DuplicateBytes { id, existing });
            }
            ids.insert(bytes.clone(), id);
        }

        let n = tokens.len();
        let mut produced = vec![false; n];
        let mut first_rank: FxHashMap<Token, MergeRank> = FxHashMap::default();
        let mut pair_ranks = FxHashMap::default();
        pair_ranks.reserve(merges.len());

        for (rank, rule) in merges.iter().enumerate() {
            for id in [rule.left, rule.right, rule.merged] {
                if id >= n {
                    return Err(ModelError::UnknownConstituent { rank, id });
                }
            }
            if rule.merged < BASE_VOCAB_SIZE {
                return Err(ModelError::MergeIntoBase {
                    rank,
                    merged: rule.merged,
                });
            }

            let (left, right, merged) = (
                &tokens[rule.left],
                &tokens[rule.right],
                &tokens[rule.merged],
            );
            if merged.len() != left.len() + right.len()
                || !merged.starts_with(left)
                || !merged.ends_with(right)
            {
                return Err(ModelError::MergeMismatch {
                    rank,
                    merged: rule.merged,
                });
            }

            produced[rule.merged] = true;
            let effective = *first_rank.entry(rule.merged).or_insert(rank);
            pair_ranks
                .entry(rule.pair())
                .or_insert((rule.merged, effective));
        }

        if let Some(orphan) = (BASE_VOCAB_SIZE..n).find(|&id| !produced[id]) {
            return Err(ModelError::OrphanToken(orphan));
        }

        let mut special_map = BTreeMap::new();
        let mut special_bytes = FxHashMap::default();
        for (name, id) in special_tokens {
            if name.is_empty() || special_map.contains_key(&name) {
                return Err(ModelError::IllegalSpecialToken(name));
            }
            if id < n || special_bytes.contains_key(&id) {
                return Err(ModelError::SpecialIdCollision(id));
            }
            let bytes = name.as_bytes().to_vec();
            if ids.contains_key(&bytes) {
                return Err(ModelError::IllegalSpecialToken(name));
            }
            ids.insert(bytes.clone(), id);
            special_bytes.insert(id, bytes);
            special_map.insert(name, id);
        }

        Ok(Self {
            tokens,
            ids,
            byte_table,
            merges,
            pair_ranks,
            special_tokens: special_map,
            special_bytes,
            whole_chunk_lookup: false,
        })
    }

    /// A vocabulary with only the 256 base tokens and no merges.
    pub fn base() -> Self {
        let tokens: Vec<ByteSeq> = (0..=u8::MAX).map(|b| vec![b]).collect();
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(id, bytes)| (bytes.clone(), id))
            .collect();
        let mut byte_table = [0; BASE_VOCAB_SIZE];
        for (b, slot) in byte_table.iter_mut().enumerate() {
            *slot = b;
        }

        Self {
            tokens,
            ids,
            byte_table,
            merges: Vec::new(),
            pair_ranks: FxHashMap::default(),
            special_tokens: BTreeMap::new(),
            special_bytes: FxHashMap::default(),
            whole_chunk_lookup: false,
        }
    }

    /// Builds a vocabulary from a merge history over the identity byte table.
    ///
    /// # Arguments
    ///
    /// * `merge_history` - Merge rules; the order of iteration determines merge
    ///   priority (earlier = higher priority). Each rule must produce either the
    ///   next unused id or an existing id with identical bytes.
    /// * `special_tokens` - `(name, id)` pairs placed above the mergeable range.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownConstituent`] when a rule references an id
    /// that does not exist yet, [`ModelError::NonContiguous`] when a rule skips
    /// ids, or any validation error from [`Vocabulary::new`].
    ///
    /// # Example
    ///
    /// ```
    /// use bytebpe::{MergeRule, Vocabulary};
    ///
    /// let vocab = Vocabulary::from_merges(
    ///     [MergeRule::new(97, 98, 256), MergeRule::new(256, 99, 257)],
    ///     [],
    /// )
    /// .unwrap();
    /// assert_eq!(vocab.id_to_bytes(257), Some(&b"abc"[..]));
    /// ```
    pub fn from_merges(
        merge_history: impl IntoIterator<Item = MergeRule>,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, ModelError> {
        let mut tokens: Vec<ByteSeq> = (0..=u8::MAX).map(|b| vec![b]).collect();
        let mut merges = Vec::new();

        for (rank, rule) in merge_history.into_iter().enumerate() {
            for id in [rule.left, rule.right] {
                if id >= tokens.len() {
                    return Err(ModelError::UnknownConstituent { rank, id });
                }
            }
            if rule.merged == tokens.len() {
                // build vocabulary entry for merged token by concatenating constituent byte sequences
                let mut merged_bytes = tokens[rule.left].clone();
                merged_bytes.extend_from_slice(&tokens[rule.right]);
                tokens.push(merged_bytes);
            } else if rule.merged > tokens.len() {
                return Err(ModelError::NonContiguous {
                    expected: tokens.len(),
                    found: rule.merged,
                });
            }
            merges.push(rule);
        }

        Self::new(tokens, merges, special_tokens)
    }

    /// Builds a vocabulary from a tiktoken-style rank table (`bytes -> rank`).
    ///
    /// Ranks become ids and must be contiguous from 0. A merge rule is derived
    /// for every way of splitting each multi-byte token into two existing
    /// tokens, ordered by the produced token's rank. Whole-chunk lookup is
    /// enabled, so a chunk that is itself a ranked token encodes to that rank
    /// the way tiktoken does.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateId`] or [`ModelError::NonContiguous`] for
    /// a broken rank table, [`ModelError::OrphanToken`] for a token that cannot
    /// be split into two tokens, or any validation error from
    /// [`Vocabulary::new`].
    pub fn from_ranks(
        ranks: impl IntoIterator<Item = (ByteSeq, Token)>,
        special_tokens: impl IntoIterator<Item = (String, Token)>,
    ) -> Result<Self, ModelError> {
        let tokens = order_by_id(ranks.into_iter().map(|(bytes, id)| (id, bytes)).collect())?;

        let lookup: FxHashMap<&[u8], Token> = tokens
            .iter()
            .enumerate()
            .map(|(id, bytes)| (bytes.as_slice(), id))
            .collect();

        let mut merges = Vec::new();
        for (id, bytes) in tokens.iter().enumerate() {
            if bytes.len() < 2 {
                continue;
            }
            for split in 1..bytes.len() {
                if let (Some(&left), Some(&right)) =
                    (lookup.get(&bytes[..split]), lookup.get(&bytes[split..]))
                {
                    merges.push(MergeRule::new(left, right, id));
                }
            }
        }
        drop(lookup);

        Ok(Self::new(tokens, merges, special_tokens)?.with_whole_chunk_lookup(true))
    }

    /// Enables or disables whole-chunk lookup.
    pub fn with_whole_chunk_lookup(mut self, enabled: bool) -> Self {
        self.whole_chunk_lookup = enabled;
        self
    }

    /// Whether a chunk equal to one mergeable token is emitted as that token
    /// without running the merges.
    pub fn whole_chunk_lookup(&self) -> bool {
        self.whole_chunk_lookup
    }

    /// Looks up the id of a byte sequence (mergeable or special).
    ///
    /// Returns `None` if no token has exactly these bytes.
    #[inline]
    pub fn byte_seq_to_id(&self, bytes: &[u8]) -> Option<Token> {
        self.ids.get(bytes).copied()
    }

    /// Looks up the id of a byte sequence among mergeable tokens only.
    #[inline]
    pub fn mergeable_id(&self, bytes: &[u8]) -> Option<Token> {
        self.ids
            .get(bytes)
            .copied()
            .filter(|&id| id < self.tokens.len())
    }

    /// Looks up the byte sequence of an id (mergeable or special).
    ///
    /// Returns `None` for an id with no entry.
    #[inline]
    pub fn id_to_bytes(&self, id: Token) -> Option<&[u8]> {
        self.tokens
            .get(id)
            .or_else(|| self.special_bytes.get(&id))
            .map(Vec::as_slice)
    }

    /// Returns the merge rank for an adjacent pair, or `None` if it never merges.
    #[inline]
    pub fn merge_rank(&self, left: Token, right: Token) -> Option<MergeRank> {
        self.pair_ranks.get(&TokenPair(left, right)).map(|&(_, rank)| rank)
    }

    /// Returns `(merged_token, rank)` for an adjacent pair, if it merges.
    #[inline]
    pub fn merge(&self, left: Token, right: Token) -> Option<(Token, MergeRank)> {
        self.pair_ranks.get(&TokenPair(left, right)).copied()
    }

    /// Base token id for a single byte value.
    #[inline]
    pub fn base_token(&self, byte: u8) -> Token {
        self.byte_table[byte as usize]
    }

    /// Merge rules in rank order.
    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// Returns the total number of merge rules.
    pub fn num_merges(&self) -> usize {
        self.merges.len()
    }

    /// Byte sequences of the mergeable tokens, indexed by id.
    pub fn tokens(&self) -> &[ByteSeq] {
        &self.tokens
    }

    /// Number of mergeable tokens (base + merged).
    pub fn num_mergeable(&self) -> usize {
        self.tokens.len()
    }

    /// Special token name → id.
    pub fn special_tokens(&self) -> &BTreeMap<String, Token> {
        &self.special_tokens
    }

    /// Id of a named special token.
    pub fn special_token(&self, name: &str) -> Option<Token> {
        self.special_tokens.get(name).copied()
    }

    /// Whether `id` is a special token.
    pub fn is_special(&self, id: Token) -> bool {
        self.special_bytes.contains_key(&id)
    }

    /// Total number of tokens, specials included.
    pub fn len(&self) -> usize {
        self.tokens.len() + self.special_tokens.len()
    }

    /// Always false: every vocabulary holds the 256 base tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::base()
    }
}

/// Sorts `(id, bytes)` entries by id and checks the ids run `0..n` without gaps.
pub(crate) fn order_by_id(mut entries: Vec<(Token, ByteSeq)>) -> Result<Vec<ByteSeq>, ModelError> {
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut tokens = Vec::with_capacity(entries.len());
    for (expected, (id, bytes)) in entries.into_iter().enumerate() {
        if id < expected {
            return Err(ModelError::DuplicateId(id));
        }
        if id != expected {
            return Err(ModelError::NonContiguous {
                expected,
                found: id,
            });
        }
        tokens.push(bytes);
    }
    Ok(tokens)
}

/// Checks the first 256 tokens cover every byte exactly once.
fn build_byte_table(tokens: &[ByteSeq]) -> Result<[Token; BASE_VOCAB_SIZE], ModelError> {
    let mut table: [Option<Token>; BASE_VOCAB_SIZE] = [None; BASE_VOCAB_SIZE];

    for (id, bytes) in tokens.iter().take(BASE_VOCAB_SIZE).enumerate() {
        let [b] = bytes.as_slice() else {
            return Err(ModelError::InvalidBaseToken { id });
        };
        if let Some(existing) = table[*b as usize] {
            return Err(ModelError::DuplicateBytes { id, existing });
        }
        table[*b as usize] = Some(id);
    }

    let mut byte_table = [0; BASE_VOCAB_SIZE];
    for (b, slot) in table.iter().enumerate() {
        match slot {
            Some(id) => byte_table[b] = *id,
            None => return Err(ModelError::MissingBaseByte(b as u8)),
        }
    }
    Ok(byte_table)
}
