use bytebpe::{BpeTrainer, Tokenizer, TrainerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus = [
        "low lower lowest",
        "new newer newest",
        "wide wider widest",
        "low new wide<|endoftext|>low new wide",
    ];

    let config = TrainerConfig::new(280).with_special_tokens(["<|endoftext|>"]);
    let mut trainer = BpeTrainer::new(config)?;
    trainer.feed(&corpus)?;
    let model = trainer.train()?;

    println!("learned {} merges:", model.vocab().num_merges());
    for (rank, rule) in model.vocab().merges().iter().enumerate() {
        let bytes = model.vocab().id_to_bytes(rule.merged).unwrap_or_default();
        println!(
            "  {rank:>3}: ({}, {}) -> {} {:?}",
            rule.left,
            rule.right,
            rule.merged,
            String::from_utf8_lossy(bytes)
        );
    }

    let tokenizer = Tokenizer::from_model(model)?;
    let text = "the lowest newer<|endoftext|>";
    let ids = tokenizer.encode_with_special(text)?;
    println!("{text:?} -> {ids:?}");
    println!("decoded: {:?}", tokenizer.decode(&ids)?);

    Ok(())
}
