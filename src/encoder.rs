//! BPE merge application for a single pre-tokenized chunk.
//!
//! The working sequence starts as one base token per byte. The adjacent pair
//! with the lowest merge rank is merged first; among equal ranks the leftmost
//! pair wins. Candidates live in a min-heap keyed by `(rank, position)` and are
//! validated lazily when popped, so each merge costs `O(log N)` instead of a
//! full rescan.

use std::{cmp::Ordering, collections::BinaryHeap};

use crate::{
    types::{MergeRank, TextIdx, Token, TokenPair},
    vocab::Vocabulary,
};

/// Item in the priority queue for merge ordering.
///
/// Candidates are ordered by rank (earliest first) with position
/// as a tiebreaker, which reproduces greedy leftmost BPE.
#[derive(Debug, PartialEq, Eq)]
struct MergeCandidate {
    /// Merge rank from training. Lower values are applied first.
    rank: MergeRank,

    /// Index of the left part of the pair.
    position: TextIdx,

    /// The token pair to be merged.
    pair: TokenPair,
}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // We reverse the comparison (other vs self) to create min-heap behavior
        // from Rust's max-heap BinaryHeap.
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.position.cmp(&self.position))
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

/// A part of the working sequence, linked to its live neighbours by index.
#[derive(Debug, Clone, Copy)]
struct Part {
    token: Token,
    prev: Option<TextIdx>,
    next: Option<TextIdx>,
}

/// Encodes one chunk's bytes and appends the ids to `out`.
///
/// With [`Vocabulary::whole_chunk_lookup`] set, a chunk whose bytes are
/// exactly one mergeable token is emitted as that token directly.
pub(crate) fn encode_chunk(vocab: &Vocabulary, bytes: &[u8], out: &mut Vec<Token>) {
    match bytes {
        [] => {}
        [b] => out.push(vocab.base_token(*b)),
        _ => {
            if vocab.whole_chunk_lookup()
                && let Some(id) = vocab.mergeable_id(bytes)
            {
                out.push(id);
                return;
            }
            let tokens = bytes.iter().map(|&b| vocab.base_token(b)).collect();
            out.extend(merge_parts(vocab, tokens));
        }
    }
}

/// Applies learned merges to a token sequence until no pair merges.
///
/// # Time Complexity
///
/// `O(N log N)` where `N` is the input length.
pub(crate) fn merge_parts(vocab: &Vocabulary, tokens: Vec<Token>) -> Vec<Token> {
    let n = tokens.len();
    if n <= 1 {
        return tokens;
    }

    let mut heap = BinaryHeap::with_capacity(n);
    for (position, window) in tokens.windows(2).enumerate() {
        push_candidate(vocab, &mut heap, position, window[0], window[1]);
    }
    if heap.is_empty() {
        return tokens;
    }

    // `None` marks a part consumed by a merge to its left.
    let mut parts: Vec<Option<Part>> = tokens
        .iter()
        .enumerate()
        .map(|(i, &token)| {
            Some(Part {
                token,
                prev: i.checked_sub(1),
                next: (i + 1 < n).then_some(i + 1),
            })
        })
        .collect();

    while let Some(candidate) = heap.pop() {
        let pos = candidate.position;

        let Some(left) = parts[pos] else {
            continue;
        };
        let Some(right_idx) = left.next else {
            continue;
        };
        let Some(right) = parts[right_idx] else {
            continue;
        };

        // validate live pair
        if candidate.pair != TokenPair(left.token, right.token) {
            continue;
        }
        let Some((merged, _)) = vocab.merge(left.token, right.token) else {
            continue;
        };

        parts[pos] = Some(Part {
            token: merged,
            prev: left.prev,
            next: right.next,
        });
        parts[right_idx] = None;

        if let Some(next_idx) = right.next
            && let Some(next) = parts[next_idx].as_mut()
        {
            next.prev = Some(pos);
            let next_token = next.token;
            push_candidate(vocab, &mut heap, pos, merged, next_token);
        }
        if let Some(prev_idx) = left.prev
            && let Some(prev) = parts[prev_idx]
        {
            push_candidate(vocab, &mut heap, prev_idx, prev.token, merged);
        }
    }

    // part 0 is never consumed: it is only ever the left side of a merge
    let mut encoding = Vec::with_capacity(n);
    let mut current = Some(0);
    while let Some(idx) = current {
        let Some(part) = parts[idx] else {
            break;
        };
        encoding.push(part.token);
        current = part.next;
    }
    encoding
}

#[inline]
fn push_candidate(
    vocab: &Vocabulary,
    heap: &mut BinaryHeap<MergeCandidate>,
    position: TextIdx,
    left: Token,
    right: Token,
) {
    if let Some(rank) = vocab.merge_rank(left, right) {
        heap.push(MergeCandidate {
            rank,
            position,
            pair: TokenPair(left, right),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MergeRule;

    fn make_vocab(history: &[((Token, Token), Token)]) -> Vocabulary {
        Vocabulary::from_merges(history.iter().copied().map(MergeRule::from), [])
            .expect("vocab init failed")
    }

    /// Scan-all-pairs reference: lowest rank, leftmost first.
    fn naive_merge(vocab: &Vocabulary, mut tokens: Vec<Token>) -> Vec<Token> {
        loop {
            let mut best: Option<(MergeRank, usize, Token)> = None;
            for i in 0..tokens.len().saturating_sub(1) {
                if let Some((merged, rank)) = vocab.merge(tokens[i], tokens[i + 1])
                    && best.is_none_or(|(best_rank, _, _)| rank < best_rank)
                {
                    best = Some((rank, i, merged));
                }
            }
            let Some((_, i, merged)) = best else {
                return tokens;
            };
            tokens[i] = merged;
            tokens.remove(i + 1);
        }
    }

    #[test]
    fn test_basic_encoding() {
        // "ab" -> 256, "ab"+"a" -> 257
        let vocab = make_vocab(&[((97, 98), 256), ((256, 97), 257)]);
        assert_eq!(merge_parts(&vocab, vec![97, 98, 97]), vec![257]);
    }

    #[test]
    fn test_single_token_no_change() {
        let vocab = make_vocab(&[((97, 98), 256)]);
        assert_eq!(merge_parts(&vocab, vec![7]), vec![7]);
        assert_eq!(merge_parts(&vocab, vec![]), Vec::<Token>::new());
    }

    #[test]
    fn test_no_merge_rules_apply() {
        let vocab = make_vocab(&[((5, 6), 256)]);
        assert_eq!(merge_parts(&vocab, vec![0, 1, 2, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_merge_skips_consumed_right() {
        let vocab = make_vocab(&[((97, 98), 256), ((256, 97), 257)]);
        assert_eq!(merge_parts(&vocab, vec![97, 98, 97, 9]), vec![257, 9]);
    }

    #[test]
    fn test_merge_skips_consumed_left() {
        let vocab = make_vocab(&[((97, 98), 256), ((99, 100), 257), ((256, 257), 258)]);
        assert_eq!(merge_parts(&vocab, vec![97, 98, 99, 100]), vec![258]);
    }

    #[test]
    fn test_tie_break_by_position() {
        // "aaa": (a, a) matches at 0 and 1; leftmost wins, leaving [aa, a]
        let vocab = make_vocab(&[((97, 97), 256)]);
        assert_eq!(merge_parts(&vocab, vec![97, 97, 97]), vec![256, 97]);
        assert_eq!(merge_parts(&vocab, vec![97, 97, 97, 97]), vec![256, 256]);
    }

    #[test]
    fn test_lower_rank_beats_position() {
        // (b, c) has rank 0 and wins over the leftmost (a, b)
        let vocab = make_vocab(&[((98, 99), 256), ((97, 98), 257)]);
        assert_eq!(merge_parts(&vocab, vec![97, 98, 99]), vec![97, 256]);
    }

    #[test]
    fn test_multiple_disjoint_merges() {
        let vocab = make_vocab(&[((97, 97), 256), ((98, 98), 257)]);
        assert_eq!(merge_parts(&vocab, vec![97, 97, 98, 98]), vec![256, 257]);
    }

    #[test]
    fn test_encode_chunk_whole_token_shortcut() {
        let vocab = make_vocab(&[((104, 105), 256)]).with_whole_chunk_lookup(true);
        let mut out = Vec::new();
        encode_chunk(&vocab, b"hi", &mut out);
        encode_chunk(&vocab, b"", &mut out);
        encode_chunk(&vocab, b"x", &mut out);
        assert_eq!(out, vec![256, 120]);
    }

    #[test]
    fn test_encode_chunk_follows_rank_order() {
        // (b, c) outranks (a, b), so "abc" never reaches token 258
        let merges = [((98, 99), 256), ((97, 98), 257), ((257, 99), 258)];
        let vocab = make_vocab(&merges);
        assert!(!vocab.whole_chunk_lookup());

        let mut out = Vec::new();
        encode_chunk(&vocab, b"abc", &mut out);
        assert_eq!(out, vec![97, 256]);
        assert_eq!(out, merge_parts(&vocab, vec![97, 98, 99]));

        let mut out = Vec::new();
        encode_chunk(&vocab.with_whole_chunk_lookup(true), b"abc", &mut out);
        assert_eq!(out, vec![258]);
    }

    #[test]
    fn test_encode_chunk_invalid_utf8_bytes() {
        let vocab = make_vocab(&[((0xff, 0xfe), 256)]);
        let mut out = Vec::new();
        encode_chunk(&vocab, &[0xff, 0xfe, 0x80], &mut out);
        assert_eq!(out, vec![256, 0x80]);
    }

    #[test]
    fn test_adversarial_repeat() {
        let vocab = make_vocab(&[((97, 98), 256), ((256, 256), 257), ((257, 257), 258)]);
        let tokens: Vec<Token> = b"ab".repeat(500).iter().map(|&b| b as Token).collect();
        let encoded = merge_parts(&vocab, tokens.clone());
        assert_eq!(encoded, naive_merge(&vocab, tokens));
        // 500 "ab" -> 250 "abab" -> 125 "abababab"
        assert_eq!(encoded, vec![258; 125]);
    }

    #[test]
    fn test_matches_naive_rescan() {
        let vocab = make_vocab(&[
            ((97, 98), 256),
            ((98, 97), 257),
            ((256, 97), 258),
            ((97, 97), 259),
            ((257, 256), 260),
            ((259, 98), 261),
            ((258, 258), 262),
            ((98, 98), 263),
        ]);

        // deterministic LCG over the alphabet {a, b}
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for len in 0..64 {
            let tokens: Vec<Token> = (0..len)
                .map(|_| {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    if (state >> 33) & 1 == 0 { 97 } else { 98 }
                })
                .collect();
            assert_eq!(
                merge_parts(&vocab, tokens.clone()),
                naive_merge(&vocab, tokens.clone()),
                "mismatch for {tokens:?}"
            );
        }
    }
}
