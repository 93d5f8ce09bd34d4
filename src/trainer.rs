//! Byte-level BPE vocabulary training.
//!
//! The corpus is pre-tokenized into chunks, identical chunks are collapsed
//! into a word-frequency table, and merges are learned greedily: at each step
//! the most frequent adjacent pair (ties to the smallest `(left, right)`) is
//! merged in every word that contains it.
//!
//! Pair frequencies are kept incrementally. After a merge only the words that
//! contained the merged pair are rescanned, and the resulting per-pair deltas
//! are applied to the counts. A max-heap holds candidate pairs; its entries may
//! be stale and are validated against the live counts when popped.
//!
//! Time complexity: `O(W + M · A · log P)` where `W` is the total word length,
//! `M` the number of merges, `A` the words touched per merge and `P` the number
//! of distinct pairs.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{EncodeError, TrainError},
    model::Model,
    pretokenizer::{CL100K_BASE_PATTERN, Pretokenizer, SpecialMatcher},
    progress::progress_bar,
    types::{BASE_VOCAB_SIZE, ByteSeq, MergeRule, Token, TokenFreq, TokenPair},
    vocab::Vocabulary,
};

/// Training parameters.
///
/// # Example
///
/// ```
/// use bytebpe::TrainerConfig;
///
/// let config = TrainerConfig::new(1000)
///     .with_special_tokens(["<|endoftext|>"])
///     .with_min_frequency(3);
/// assert_eq!(config.vocab_size(), 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerConfig {
    vocab_size: usize,
    special_tokens: Vec<String>,
    pattern: String,
    min_frequency: TokenFreq,
    show_progress: bool,
}

impl TrainerConfig {
    /// Default minimum pair frequency: pairs seen only once are never merged.
    pub const DEFAULT_MIN_FREQUENCY: TokenFreq = 2;

    /// Configuration targeting `vocab_size` tokens (specials included),
    /// with the cl100k split pattern and no special tokens.
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            special_tokens: Vec::new(),
            pattern: CL100K_BASE_PATTERN.to_string(),
            min_frequency: Self::DEFAULT_MIN_FREQUENCY,
            show_progress: false,
        }
    }

    /// Registers special tokens, in id order.
    pub fn with_special_tokens<S: Into<String>>(
        mut self,
        special_tokens: impl IntoIterator<Item = S>,
    ) -> Self {
        self.special_tokens = special_tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the pre-tokenizer pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Stops training once the best pair occurs fewer than `min_frequency` times.
    pub fn with_min_frequency(mut self, min_frequency: TokenFreq) -> Self {
        self.min_frequency = min_frequency.max(1);
        self
    }

    /// Shows progress bars while counting and merging.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Target vocabulary size, special tokens included.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Special tokens in id order.
    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    /// Pre-tokenizer pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Minimum count for a pair to be merged.
    pub fn min_frequency(&self) -> TokenFreq {
        self.min_frequency
    }

    /// Whether progress bars are drawn.
    pub fn show_progress(&self) -> bool {
        self.show_progress
    }

    /// Base tokens plus special tokens.
    fn reserved(&self) -> usize {
        BASE_VOCAB_SIZE + self.special_tokens.len()
    }
}

/// A distinct pre-tokenized chunk as its current token sequence.
#[derive(Debug, Clone)]
struct Word {
    ids: Vec<Token>,
    count: TokenFreq,
}

impl Word {
    fn pairs(&self) -> impl Iterator<Item = TokenPair> + '_ {
        self.ids.windows(2).map(|w| TokenPair(w[0], w[1]))
    }

    /// Replaces every non-overlapping occurrence of `pair`, scanning left to
    /// right, and returns the per-occurrence pair count changes.
    fn merge_pair(&mut self, pair: TokenPair, merged: Token) -> Vec<(TokenPair, isize)> {
        let TokenPair(left, right) = pair;
        let n = self.ids.len();
        let mut out = Vec::with_capacity(n);
        let mut deltas = Vec::new();

        let mut i = 0;
        while i < n {
            if i + 1 < n && self.ids[i] == left && self.ids[i + 1] == right {
                if let Some(&prev) = out.last() {
                    deltas.push((TokenPair(prev, left), -1));
                    deltas.push((TokenPair(prev, merged), 1));
                }
                deltas.push((pair, -1));
                if let Some(&next) = self.ids.get(i + 2) {
                    deltas.push((TokenPair(right, next), -1));
                    deltas.push((TokenPair(merged, next), 1));
                }
                out.push(merged);
                i += 2;
            } else {
                out.push(self.ids[i]);
                i += 1;
            }
        }

        self.ids = out;
        deltas
    }
}

/// Heap entry: highest count first, then the smallest pair.
#[derive(Debug, PartialEq, Eq)]
struct MergeJob {
    count: TokenFreq,
    pair: TokenPair,
}

impl PartialOrd for MergeJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| Reverse(self.pair).cmp(&Reverse(other.pair)))
    }
}

/// Id ↔ bytes table grown during training.
#[derive(Debug)]
struct TokenTable {
    tokens: Vec<ByteSeq>,
    ids: FxHashMap<ByteSeq, Token>,
}

impl TokenTable {
    fn new() -> Self {
        let tokens: Vec<ByteSeq> = (0..=u8::MAX).map(|b| vec![b]).collect();
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(id, bytes)| (bytes.clone(), id))
            .collect();
        Self { tokens, ids }
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns the id for the concatenation of `left` and `right`, allocating
    /// the next id unless those bytes already have one.
    fn intern(&mut self, TokenPair(left, right): TokenPair) -> Token {
        let mut bytes = self.tokens[left].clone();
        bytes.extend_from_slice(&self.tokens[right]);

        if let Some(&id) = self.ids.get(&bytes) {
            return id;
        }
        let id = self.tokens.len();
        self.ids.insert(bytes.clone(), id);
        self.tokens.push(bytes);
        id
    }
}

type PairCounts = FxHashMap<TokenPair, TokenFreq>;
type PairWords = FxHashMap<TokenPair, FxHashSet<usize>>;

/// BPE trainer accumulating a word-frequency table over one or more corpus batches.
#[derive(Debug)]
pub struct BpeTrainer {
    config: TrainerConfig,
    pretokenizer: Pretokenizer,
    specials: Option<SpecialMatcher>,
    /// chunk → occurrence count
    word_counts: FxHashMap<String, TokenFreq>,
}

impl BpeTrainer {
    /// Validates `config` and prepares an empty trainer.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::VocabSizeTooSmall`] if the target leaves no room
    /// for a merge, [`TrainError::IllegalSpecialToken`] for an empty, duplicate
    /// or single-byte special token, or [`TrainError::InvalidPattern`] if the
    /// pattern fails to compile.
    pub fn new(config: TrainerConfig) -> Result<Self, TrainError> {
        let reserved = config.reserved();
        if config.vocab_size <= reserved {
            return Err(TrainError::VocabSizeTooSmall {
                vocab_size: config.vocab_size,
                reserved,
            });
        }

        let mut seen = FxHashSet::default();
        for special in &config.special_tokens {
            // a single byte would collide with its base token
            if special.len() < 2 || !seen.insert(special.as_str()) {
                return Err(TrainError::IllegalSpecialToken(special.clone()));
            }
        }

        let pretokenizer = Pretokenizer::new(&config.pattern)?;
        let specials = SpecialMatcher::new(
            config
                .special_tokens
                .iter()
                .enumerate()
                .map(|(i, s)| (s.as_str(), i)),
        )?;

        Ok(Self {
            config,
            pretokenizer,
            specials,
            word_counts: FxHashMap::default(),
        })
    }

    /// Pre-tokenizes `texts` in parallel and adds their chunks to the
    /// word-frequency table. Special-token strings are cut out and not counted.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Encode`] if splitting a text fails, or
    /// [`TrainError::ProgressBarSetup`] if the progress bar template fails.
    pub fn feed<S: AsRef<str> + Sync>(&mut self, texts: &[S]) -> Result<(), TrainError> {
        let pb = progress_bar(
            texts.len() as u64,
            "Counting chunks",
            self.config.show_progress,
        )?;

        let pretokenizer = &self.pretokenizer;
        let specials = self.specials.as_ref();

        let counts = texts
            .par_iter()
            .progress_with(pb)
            .try_fold(
                FxHashMap::default,
                |mut acc: FxHashMap<String, TokenFreq>, text| -> Result<_, EncodeError> {
                    let text: &str = text.as_ref();
                    match specials {
                        Some(matcher) => {
                            for span in matcher.text_spans(text)? {
                                count_chunks(pretokenizer, span, &mut acc)?;
                            }
                        }
                        None => count_chunks(pretokenizer, text, &mut acc)?,
                    }
                    Ok(acc)
                },
            )
            .try_reduce(FxHashMap::default, |a, b| Ok(merge_counts(a, b)))?;

        if self.word_counts.is_empty() {
            self.word_counts = counts;
        } else {
            let current = std::mem::take(&mut self.word_counts);
            self.word_counts = merge_counts(current, counts);
        }

        log::info!(
            "counted {} texts, {} distinct chunks so far",
            texts.len(),
            self.word_counts.len()
        );
        Ok(())
    }

    /// Number of distinct chunks counted so far.
    pub fn num_words(&self) -> usize {
        self.word_counts.len()
    }

    /// Learns merges until the vocabulary reaches the target size or no pair
    /// is frequent enough.
    ///
    /// Special tokens take the ids directly after the learned tokens, in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ProgressBarSetup`] if the progress bar template
    /// fails, or [`TrainError::Malformed`] if the learned vocabulary fails
    /// validation.
    pub fn train(self) -> Result<Model, TrainError> {
        let Self {
            config,
            word_counts,
            ..
        } = self;

        let target = config.vocab_size - config.special_tokens.len();
        let mut words = build_words(word_counts);
        let mut table = TokenTable::new();
        let mut merges: Vec<MergeRule> = Vec::new();

        log::info!(
            "training on {} distinct chunks, target {} mergeable tokens",
            words.len(),
            target
        );

        let (mut pair_counts, mut pair_words) = count_pairs(&words);
        // bounded by the pairs actually present, not the requested size
        merges.reserve((target - BASE_VOCAB_SIZE).min(pair_counts.len()));
        let mut heap: BinaryHeap<MergeJob> = pair_counts
            .iter()
            .map(|(&pair, &count)| MergeJob { count, pair })
            .collect();

        let pb = progress_bar(
            (target - BASE_VOCAB_SIZE) as u64,
            "Learning merges",
            config.show_progress,
        )?;

        while table.len() < target {
            let Some(job) = heap.pop() else {
                break;
            };

            let current = pair_counts.get(&job.pair).copied().unwrap_or(0);
            if job.count != current {
                // stale entry
                if current > 0 {
                    log::trace!("requeue {:?}: {} -> {}", job.pair, job.count, current);
                    heap.push(MergeJob {
                        count: current,
                        pair: job.pair,
                    });
                }
                continue;
            }
            if current < config.min_frequency {
                break;
            }

            let pair = job.pair;
            let merged = table.intern(pair);
            merges.push(MergeRule::new(pair.0, pair.1, merged));
            log::debug!(
                "merge {}: ({}, {}) -> {} (count {})",
                merges.len() - 1,
                pair.0,
                pair.1,
                merged,
                current
            );

            let mut changed: FxHashSet<TokenPair> = FxHashSet::default();
            let mut affected: Vec<usize> = pair_words
                .remove(&pair)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
            affected.sort_unstable();

            for word_idx in affected {
                let word = &mut words[word_idx];
                let count = word.count as isize;
                let mut lost: Vec<TokenPair> = Vec::new();
                for (delta_pair, delta) in word.merge_pair(pair, merged) {
                    apply_delta(&mut pair_counts, delta_pair, delta * count);
                    if delta > 0 {
                        pair_words.entry(delta_pair).or_default().insert(word_idx);
                        changed.insert(delta_pair);
                    } else if delta_pair != pair {
                        lost.push(delta_pair);
                    }
                }
                prune_pair_words(&mut pair_words, word, word_idx, lost);
            }
            pair_counts.remove(&pair);

            let mut changed: Vec<TokenPair> = changed.into_iter().collect();
            changed.sort_unstable();
            for changed_pair in changed {
                if let Some(&count) = pair_counts.get(&changed_pair) {
                    heap.push(MergeJob {
                        count,
                        pair: changed_pair,
                    });
                }
            }

            pb.inc(1);
        }
        pb.finish_and_clear();

        log::info!(
            "learned {} merges, {} mergeable tokens",
            merges.len(),
            table.len()
        );

        let num_mergeable = table.len();
        let specials = config
            .special_tokens
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), num_mergeable + i));
        let vocab = Vocabulary::new(table.tokens, merges, specials)?;

        Ok(Model::new(config.pattern, vocab))
    }
}

/// Trains a vocabulary of `vocab_size` tokens on `corpus` with default settings.
///
/// # Errors
///
/// Returns [`TrainError::VocabSizeTooSmall`] if `vocab_size <= 256`, or any
/// error from [`BpeTrainer::feed`] and [`BpeTrainer::train`].
///
/// # Example
///
/// ```
/// let model = bytebpe::train(&["hello hello hello"], 300).unwrap();
/// assert!(model.vocab().len() <= 300);
/// ```
pub fn train<S: AsRef<str> + Sync>(corpus: &[S], vocab_size: usize) -> Result<Model, TrainError> {
    let mut trainer = BpeTrainer::new(TrainerConfig::new(vocab_size))?;
    trainer.feed(corpus)?;
    trainer.train()
}

fn count_chunks(
    pretokenizer: &Pretokenizer,
    text: &str,
    acc: &mut FxHashMap<String, TokenFreq>,
) -> Result<(), EncodeError> {
    pretokenizer.for_each_chunk(text, |chunk| match acc.get_mut(chunk) {
        Some(count) => *count += 1,
        None => {
            acc.insert(chunk.to_string(), 1);
        }
    })
}

/// Sums two count maps, draining the smaller into the larger.
fn merge_counts(
    a: FxHashMap<String, TokenFreq>,
    b: FxHashMap<String, TokenFreq>,
) -> FxHashMap<String, TokenFreq> {
    let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    for (chunk, count) in small {
        *big.entry(chunk).or_insert(0) += count;
    }
    big
}

/// Converts the chunk table into words sorted by chunk text.
fn build_words(word_counts: FxHashMap<String, TokenFreq>) -> Vec<Word> {
    let mut entries: Vec<(String, TokenFreq)> = word_counts.into_iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    entries
        .into_iter()
        .map(|(chunk, count)| Word {
            ids: chunk.bytes().map(Token::from).collect(),
            count,
        })
        .collect()
}

/// Counts every adjacent pair across all words, weighted by word count,
/// and records which words contain each pair.
fn count_pairs(words: &[Word]) -> (PairCounts, PairWords) {
    words
        .par_iter()
        .enumerate()
        .fold(
            || (PairCounts::default(), PairWords::default()),
            |(mut counts, mut where_), (idx, word)| {
                for pair in word.pairs() {
                    *counts.entry(pair).or_insert(0) += word.count;
                    where_.entry(pair).or_default().insert(idx);
                }
                (counts, where_)
            },
        )
        .reduce(
            || (PairCounts::default(), PairWords::default()),
            |(mut counts, mut where_), (other_counts, other_where)| {
                for (pair, count) in other_counts {
                    *counts.entry(pair).or_insert(0) += count;
                }
                for (pair, idxs) in other_where {
                    where_.entry(pair).or_default().extend(idxs);
                }
                (counts, where_)
            },
        )
}

/// Drops `word_idx` from the index of every pair in `lost` the word no longer contains.
fn prune_pair_words(
    pair_words: &mut PairWords,
    word: &Word,
    word_idx: usize,
    mut lost: Vec<TokenPair>,
) {
    lost.sort_unstable();
    lost.dedup();
    for gone in lost {
        if word.pairs().any(|p| p == gone) {
            continue;
        }
        if let Some(set) = pair_words.get_mut(&gone) {
            set.remove(&word_idx);
            if set.is_empty() {
                pair_words.remove(&gone);
            }
        }
    }
}

fn apply_delta(pair_counts: &mut PairCounts, pair: TokenPair, delta: isize) {
    let count = pair_counts.entry(pair).or_insert(0);
    *count = count.saturating_add_signed(delta);
    if *count == 0 {
        pair_counts.remove(&pair);
    }
}
