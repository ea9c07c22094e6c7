use criterion::{black_box, criterion_group, criterion_main, Criterion};
use segtag_core::{
    Alphabet, FeatureRecord, LookupTable, Model, ModelOptions, ModelVariant, Phase,
};

fn char_neural_model() -> Model {
    let options = ModelOptions::new()
        .with_variant(ModelVariant::CharNeural)
        .with_word_context(2)
        .with_hidden_sizes(64, 32);
    let mut model = Model::new(options).unwrap();

    let words = Alphabet::from_entries((0..500).map(|i| format!("w{i}")));
    let table = LookupTable::random(model.arena_mut(), "words", words.len(), 50).unwrap();
    model.store.set_words(words, table);
    let chars = Alphabet::from_entries((0..100).map(|i| format!("c{i}")));
    let table = LookupTable::random(model.arena_mut(), "chars", chars.len(), 20).unwrap();
    model.store.set_chars(chars, table);
    model
        .store
        .set_labels(Alphabet::from_entries(["b", "m", "e", "s"]));
    model.initial().unwrap();
    model
}

fn sentence(len: u32) -> Vec<FeatureRecord> {
    (0..len)
        .map(|i| FeatureRecord::new(i % 500).with_chars(vec![i % 100, (i * 7) % 100]))
        .collect()
}

fn bench_forward(c: &mut Criterion) {
    let model = char_neural_model();
    let mut graph = model.graph().unwrap();
    let short = sentence(10);
    let long = sentence(60);

    c.bench_function("char_neural_forward_10", |b| {
        b.iter(|| graph.forward(black_box(&short), Phase::Decode).unwrap());
    });

    c.bench_function("char_neural_forward_60", |b| {
        b.iter(|| graph.forward(black_box(&long), Phase::Decode).unwrap());
    });

    c.bench_function("char_neural_decode_10", |b| {
        let mut graph = model.graph().unwrap();
        b.iter(|| model.decode(&mut graph, black_box(&short)).unwrap());
    });
}

criterion_group!(benches, bench_forward);
criterion_main!(benches);
