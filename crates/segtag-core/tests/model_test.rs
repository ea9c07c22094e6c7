use std::path::PathBuf;

use segtag_core::{
    segment, Alphabet, FeatureRecord, LookupTable, Model, ModelOptions, ModelVariant, Phase,
    RawSentence, SegTag, SegtagError,
};

const SENTENCE: &str = r#"{
    "tokens": [
        {"word": "上", "types": ["han"], "chars": ["上"], "sparse": ["c=上", "n=海"]},
        {"word": "海", "types": ["han"], "chars": ["海"], "sparse": ["c=海", "p=上"]},
        {"word": "是", "types": ["han"], "chars": ["是"], "sparse": ["c=是"]},
        {"word": "2", "types": ["digit"], "chars": ["2"], "sparse": ["c=2", "never-seen"]}
    ],
    "labels": ["b", "e", "s", "s"]
}"#;

fn model(variant: ModelVariant) -> Model {
    let options = ModelOptions::new()
        .with_variant(variant)
        .with_word_context(1)
        .with_hidden_sizes(6, 4)
        .with_dropout(0.0)
        .with_capacity(16, 3);
    let mut model = Model::with_seed(options, 42).unwrap();

    let words = Alphabet::from_entries(["-unknown-", "上", "海", "是"]);
    let table = LookupTable::random(model.arena_mut(), "words", words.len(), 4).unwrap();
    model.store.set_words(words, table);
    let chars = Alphabet::from_entries(["-unknown-", "上", "海", "是"]);
    let table = LookupTable::random(model.arena_mut(), "chars", chars.len(), 3).unwrap();
    model.store.set_chars(chars, table);
    let types = Alphabet::from_entries(["han", "digit"]);
    let table = LookupTable::random(model.arena_mut(), "types[0]", types.len(), 2).unwrap();
    model.store.add_type(types, table);
    model
        .store
        .set_sparse_alphabet(Alphabet::from_entries(["c=上", "c=海", "c=是", "n=海", "p=上"]));
    model
        .store
        .set_labels(Alphabet::from_entries(["b", "m", "e", "s"]));
    model.initial().unwrap();
    model
}

fn labelled(model: &Model) -> (Vec<FeatureRecord>, Vec<usize>) {
    let sentence: RawSentence = serde_json::from_str(SENTENCE).unwrap();
    let features = sentence.encode(&model.store).unwrap();
    let gold = sentence.gold(&model.store).unwrap().unwrap();
    (features, gold)
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("segtag-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn test_decode_yields_valid_segmentation() {
    for &variant in ModelVariant::all() {
        let model = model(variant);
        let (features, _) = labelled(&model);
        let mut graph = model.graph().unwrap();
        let labels = model.decode_labels(&mut graph, &features).unwrap();
        assert_eq!(labels.len(), 4, "{variant}");

        let tags: Vec<SegTag> = labels
            .iter()
            .map(|l| SegTag::from_label(l).unwrap())
            .collect();
        assert!(tags[0].can_start());
        assert!(tags[3].can_end());
        for pair in tags.windows(2) {
            assert!(SegTag::is_valid_transition(pair[0], pair[1]));
        }
        let words = segment(&["上", "海", "是", "2"], &tags);
        assert_eq!(words.concat(), "上海是2");
    }
}

#[test]
fn test_training_lowers_loss() {
    for variant in [ModelVariant::Neural, ModelVariant::CharSparse, ModelVariant::Sparse] {
        let mut model = model(variant);
        model.hyper.ada_alpha = 0.1;
        let (features, gold) = labelled(&model);
        let mut optimizer = model.optimizer().unwrap();
        let mut graph = model.graph().unwrap();

        let first = model
            .train_step(&mut graph, &mut optimizer, &features, &gold)
            .unwrap();
        let mut last = first;
        for _ in 0..30 {
            last = model
                .train_step(&mut graph, &mut optimizer, &features, &gold)
                .unwrap();
        }
        assert!(last < first, "{variant}: {first} -> {last}");
    }
}

#[test]
fn test_trained_model_learns_the_sentence() {
    let mut model = model(ModelVariant::Sparse);
    model.hyper.ada_alpha = 0.5;
    let (features, gold) = labelled(&model);
    let mut optimizer = model.optimizer().unwrap();
    let mut graph = model.graph().unwrap();
    for _ in 0..50 {
        model
            .train_step(&mut graph, &mut optimizer, &features, &gold)
            .unwrap();
    }
    assert_eq!(model.decode(&mut graph, &features).unwrap(), gold);

    let marginals = model.marginals(&mut graph, &features).unwrap();
    for (row, &label) in marginals.iter().zip(&gold) {
        let best = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(best, label);
    }
}

#[test]
fn test_save_and_load_directory() {
    let model = model(ModelVariant::CharSparse);
    let (features, _) = labelled(&model);
    let dir = scratch_dir("roundtrip");
    model.save_dir(&dir).unwrap();

    let loaded = Model::load_dir(&dir).unwrap();
    assert_eq!(loaded.hyper, model.hyper);
    assert_eq!(loaded.options, model.options);
    assert_eq!(loaded.store.word_alpha, model.store.word_alpha);
    assert_eq!(loaded.arena().len(), model.arena().len());

    let scores = |m: &Model| {
        let mut graph = m.graph().unwrap();
        graph
            .forward(&features, Phase::Decode)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap()
    };
    assert_eq!(scores(&loaded), scores(&model));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_variant_mismatch_on_load() {
    let model = model(ModelVariant::Neural);
    let dir = scratch_dir("mismatch");
    model.save_dir(&dir).unwrap();
    let options = ModelOptions::new().with_variant(ModelVariant::Sparse);
    std::fs::write(
        dir.join("options.json"),
        serde_json::to_string(&options).unwrap(),
    )
    .unwrap();
    assert!(matches!(
        Model::load_dir(&dir),
        Err(SegtagError::Config(_))
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_gradient_check_agrees() {
    let model = model(ModelVariant::Neural);
    let (features, gold) = labelled(&model);
    let report = model.gradient_check(&[(features, gold)], 7).unwrap();
    assert_eq!(report.entries.len(), 11);
    assert!(report.passed(5e-2), "{report:?}");
}

#[test]
fn test_uninitialised_model_has_no_graph() {
    let options = ModelOptions::new().with_variant(ModelVariant::Neural);
    let model = Model::new(options).unwrap();
    assert!(matches!(model.graph(), Err(SegtagError::NotDerived)));
}
