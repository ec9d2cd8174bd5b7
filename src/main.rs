use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use topkeval::eval::{GroundTruthRecord, ScoreBatch};
use topkeval::{Config, GroundTruth, PassContext, TopKEvaluator};

/// Offline top-K ranking evaluation.
#[derive(Parser, Debug)]
#[command(name = "topkeval", version)]
struct Args {
    /// Config file (default: $TOPKEVAL_CONFIG or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score one evaluation pass read from a JSON file.
    Evaluate {
        /// Pass file: users, positives and score batches.
        #[arg(long)]
        input: PathBuf,

        /// Treat this as a test pass (eligible for the audit file).
        #[arg(long)]
        test: bool,

        /// Pass index used by the audit trigger and file name.
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print the evaluator summary.
    Verify,
}

/// One pass as written by an external evaluation loop.
#[derive(Debug, Deserialize)]
struct PassInput {
    #[serde(flatten)]
    truth: GroundTruthRecord,
    batches: Vec<ScoreBatch>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let evaluator = TopKEvaluator::from_config(&config)?;

    match args.command {
        Command::Verify => {
            println!("{}", evaluator);
        }
        Command::Evaluate { input, test, index, json } => {
            log::info!("{}", evaluator);

            let input_json = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let pass: PassInput = serde_json::from_str(&input_json)
                .with_context(|| format!("Invalid pass JSON in {}", input.display()))?;
            let truth = GroundTruth::try_from(pass.truth)?;

            let mut eval_pass = evaluator.begin_pass();
            for batch in &pass.batches {
                eval_pass.collect(batch)?;
            }
            let result = eval_pass.finish(&truth, &PassContext { is_test: test, index })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result);
            }
        }
    }

    Ok(())
}
