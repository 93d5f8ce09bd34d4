use bytebpe::{
    BpeTrainer, CL100K_BASE_PATTERN, ErrorMode, Model, Session, Tokenizer, TrainerConfig,
    VocabularySource, Vocabulary, train,
};

const CORPUS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "Never jump over the lazy dog quickly; the dog may wake up.",
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit.",
    "Numbers like 1234567 and 3.14159 are split into groups.",
    "Whitespace   runs\tand\nnewlines\n\nmatter too.",
    "Ünïcödé, 日本語のテキスト, and emoji 🎉🎉 all count.",
];

const SAMPLES: &[&str] = &[
    "",
    " ",
    "hi",
    "The lazy dog sleeps.",
    "  leading and trailing  ",
    "tabs\tand\r\nCRLF\n",
    "日本語 text with emoji 🦀👍🏽",
    "<|endoftext|> is ordinary text here",
    "x",
];

fn trained() -> Tokenizer {
    let config = TrainerConfig::new(400).with_special_tokens(["<|endoftext|>"]);
    let mut trainer = BpeTrainer::new(config).unwrap();
    trainer.feed(CORPUS).unwrap();
    Tokenizer::from_model(trainer.train().unwrap()).unwrap()
}

#[test]
fn round_trip_trained() {
    let tokenizer = trained();
    for sample in SAMPLES {
        let ids = tokenizer.encode(sample).unwrap();
        assert_eq!(tokenizer.decode(&ids).unwrap(), *sample, "ids: {ids:?}");
        let ids = tokenizer.encode_with_special(sample).unwrap();
        assert_eq!(tokenizer.decode(&ids).unwrap(), *sample);
    }
}

#[test]
fn trained_merges_compress() {
    let tokenizer = trained();
    let text = "the lazy dog";
    assert!(tokenizer.encode(text).unwrap().len() < text.len());
}

#[test]
fn hi_without_merges() {
    let tokenizer = Tokenizer::new(Vocabulary::base(), CL100K_BASE_PATTERN).unwrap();
    let h = tokenizer.vocab().byte_seq_to_id(b"h").unwrap();
    let i = tokenizer.vocab().byte_seq_to_id(b"i").unwrap();
    let ids = tokenizer.encode("hi").unwrap();
    assert_eq!(ids, vec![h, i]);
    assert_eq!(tokenizer.decode(&ids).unwrap(), "hi");
}

#[test]
fn empty_input() {
    let tokenizer = trained();
    assert!(tokenizer.encode("").unwrap().is_empty());
    assert_eq!(tokenizer.decode(&[]).unwrap(), "");
}

#[test]
fn every_byte_has_a_base_token() {
    let tokenizer = trained();
    for b in 0..=u8::MAX {
        let ids = tokenizer.encode_bytes(&[b]).unwrap();
        assert_eq!(ids.len(), 1, "byte {b:#04x}");
        assert_eq!(tokenizer.vocab().id_to_bytes(ids[0]), Some(&[b][..]));
    }
}

#[test]
fn arbitrary_bytes_round_trip() {
    let tokenizer = trained();
    let bytes: Vec<u8> = (0..=u8::MAX).rev().chain(b"the dog".iter().copied()).collect();
    let ids = tokenizer.encode_bytes(&bytes).unwrap();
    assert_eq!(tokenizer.decode_bytes(&ids).unwrap(), bytes);
    assert!(tokenizer.decode_with(&ids, ErrorMode::Strict).is_err());
}

#[test]
fn encoding_is_deterministic() {
    let tokenizer = trained();
    let first = tokenizer.encode_batch(SAMPLES, false).unwrap();
    let second = tokenizer.encode_batch(SAMPLES, false).unwrap();
    assert_eq!(first, second);
    for (sample, ids) in SAMPLES.iter().zip(&first) {
        assert_eq!(&tokenizer.encode(sample).unwrap(), ids);
    }
}

#[test]
fn save_reload_encodes_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let tokenizer = trained();
    tokenizer.save(&path).unwrap();

    let mut session = Session::new();
    session.init(VocabularySource::ModelFile(path.clone())).unwrap();
    for sample in SAMPLES {
        assert_eq!(
            session.encode(sample).unwrap(),
            tokenizer.encode(sample).unwrap()
        );
    }
    assert_eq!(Model::load(&path).unwrap(), tokenizer.to_model());
}

#[test]
fn training_is_bounded_and_repeatable() {
    for vocab_size in [257, 300, 350] {
        let first = train(CORPUS, vocab_size).unwrap();
        let second = train(CORPUS, vocab_size).unwrap();
        assert!(first.vocab().len() <= vocab_size);
        assert_eq!(first.vocab().merges(), second.vocab().merges());
    }
}

#[test]
fn decode_batch_matches_single() {
    let tokenizer = trained();
    let encoded = tokenizer.encode_batch(SAMPLES, false).unwrap();
    let seqs: Vec<&[usize]> = encoded.iter().map(Vec::as_slice).collect();
    let decoded = tokenizer.decode_batch(&seqs, ErrorMode::Strict, false).unwrap();
    assert_eq!(decoded, SAMPLES);
}
