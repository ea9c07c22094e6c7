//! segtag command-line tool
//!
//! Inspects, decodes with and gradient-checks a model directory written by
//! `Model::save_dir`. Sentences are read as JSON lines of `RawSentence`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use segtag_core::{segment, FeatureRecord, GraphCapacity, Model, RawSentence, SegTag};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Parser)]
#[command(name = "segtag")]
#[command(about = "Inspect and run CRF word segmentation models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print hyperparameters and table shapes of a saved model
    Inspect {
        /// Model directory
        #[arg(short, long)]
        model: PathBuf,
    },
    /// Decode sentences and print one label per token
    Decode {
        /// Model directory
        #[arg(short, long)]
        model: PathBuf,
        /// JSON-lines input, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
        /// Print segmented words instead of labels when the labels are B/M/E/S
        #[arg(short, long)]
        segment: bool,
    },
    /// Compare analytic and numeric gradients on labelled sentences
    Gradcheck {
        /// Model directory
        #[arg(short, long)]
        model: PathBuf,
        /// JSON-lines input, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
        /// Seed for the sampled elements
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Largest relative difference accepted
        #[arg(long, default_value_t = 1e-2)]
        tolerance: f32,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_input(input: &str) -> Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(input).with_context(|| format!("cannot open {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn read_sentences(input: &str) -> Result<Vec<RawSentence>> {
    let mut sentences = Vec::new();
    for (number, line) in open_input(input)?.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sentence: RawSentence = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not a sentence", number + 1))?;
        sentences.push(sentence);
    }
    debug!(count = sentences.len(), "sentences read");
    Ok(sentences)
}

fn load_model(dir: &Path) -> Result<Model> {
    Model::load_dir(dir).with_context(|| format!("cannot load model from {}", dir.display()))
}

fn inspect(dir: &Path) -> Result<()> {
    let model = load_model(dir)?;
    let hyper = &model.hyper;
    let store = &model.store;

    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "variant          {}", store.variant)?;
    writeln!(out, "word context     {}", hyper.word_context)?;
    writeln!(out, "word window      {}", hyper.word_window)?;
    writeln!(out, "hidden size      {}", hyper.hidden_size)?;
    writeln!(out, "rnn hidden size  {}", hyper.rnn_hidden_size)?;
    writeln!(out, "dropout          {}", hyper.dropout)?;
    writeln!(out, "regularization   {}", hyper.regularization)?;
    writeln!(out, "adagrad          alpha {} eps {}", hyper.ada_alpha, hyper.ada_eps)?;
    writeln!(out, "unit size        {}", hyper.unit_size)?;
    writeln!(out, "input size       {}", hyper.input_size)?;
    writeln!(out, "labels           {}", store.label_alpha.entries().join(" "))?;
    writeln!(out, "words            {} x {}", store.word_alpha.len(), hyper.word_dim)?;
    writeln!(out, "chars            {} x {}", store.char_alpha.len(), hyper.char_dim)?;
    for (k, (alpha, dim)) in store.type_alphas.iter().zip(&hyper.type_dims).enumerate() {
        writeln!(out, "types[{k}]         {} x {}", alpha.len(), dim)?;
    }
    writeln!(out, "sparse features  {}", store.sparse_alpha.len())?;
    writeln!(out, "weight blocks    {}", model.arena().len())?;
    out.flush()?;
    Ok(())
}

fn decode(dir: &Path, input: &str, as_words: bool) -> Result<()> {
    let model = load_model(dir)?;
    let sentences = read_sentences(input)?;
    let mut graph = model.graph()?;

    let mut out = BufWriter::new(io::stdout().lock());
    for (number, sentence) in sentences.iter().enumerate() {
        let features = sentence
            .encode(&model.store)
            .with_context(|| format!("sentence {}", number + 1))?;
        let capacity = graph.capacity();
        if features.len() > capacity.max_sentence_length {
            warn!(
                sentence = number + 1,
                tokens = features.len(),
                "growing graph for long sentence"
            );
            graph.resize(GraphCapacity {
                max_sentence_length: features.len(),
                ..capacity
            });
        }
        let labels = model.decode_labels(&mut graph, &features)?;

        if as_words {
            let tags: Option<Vec<SegTag>> = labels.iter().map(|l| SegTag::from_label(l)).collect();
            let Some(tags) = tags else {
                bail!("labels are not segmentation tags, decode without --segment");
            };
            let units: Vec<&str> = sentence.tokens.iter().map(|t| t.word.as_str()).collect();
            writeln!(out, "{}", segment(&units, &tags).join(" "))?;
        } else {
            writeln!(out, "{}", labels.join(" "))?;
        }
    }
    out.flush()?;
    info!(sentences = sentences.len(), "decoding finished");
    Ok(())
}

fn gradcheck(dir: &Path, input: &str, seed: u64, tolerance: f32) -> Result<()> {
    let model = load_model(dir)?;
    let mut labelled: Vec<(Vec<FeatureRecord>, Vec<usize>)> = Vec::new();
    for (number, sentence) in read_sentences(input)?.iter().enumerate() {
        let features = sentence.encode(&model.store)?;
        match sentence.gold(&model.store)? {
            Some(gold) => labelled.push((features, gold)),
            None => warn!(sentence = number + 1, "unlabelled sentence skipped"),
        }
    }
    if labelled.is_empty() {
        bail!("no labelled sentences in {input}");
    }

    let report = model.gradient_check(&labelled, seed)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for entry in &report.entries {
        writeln!(
            out,
            "{:<28} [{:>6}] analytic {:>12.6} numeric {:>12.6} rel {:.3e}",
            entry.label,
            entry.index,
            entry.analytic,
            entry.numeric,
            entry.rel_diff()
        )?;
    }
    out.flush()?;

    if !report.passed(tolerance) {
        bail!(
            "gradient check failed: max relative difference {:.3e} above {:.3e}",
            report.max_rel_diff(),
            tolerance
        );
    }
    info!(max_rel_diff = report.max_rel_diff(), "gradient check passed");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Inspect { model } => inspect(&model),
        Commands::Decode {
            model,
            input,
            segment,
        } => decode(&model, &input, segment),
        Commands::Gradcheck {
            model,
            input,
            seed,
            tolerance,
        } => gradcheck(&model, &input, seed, tolerance),
    }
}
