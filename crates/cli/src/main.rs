//! askdoc CLI
//!
//! Answers one question about one PDF document and prints the result as
//! a `{question, answer}` JSON object. Exits non-zero on any pipeline
//! failure, naming the failing stage.

use askdoc_core::{AppConfig, Pipeline, PipelineAnswer, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "askdoc", version, about = "Ask a question about a PDF document")]
struct Args {
    /// Path to the PDF document
    #[arg(long)]
    pdf_path: PathBuf,

    /// The question to ask about the document
    #[arg(long)]
    question: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    match run(&args).await {
        Ok(result) => {
            let out = serde_json::json!({
                "question": result.question,
                "answer": result.answer,
            });
            println!("{out}");
        }
        Err(e) => {
            tracing::error!(stage = e.stage(), error = %e, "pipeline failed");
            eprintln!("askdoc: {} error: {e}", e.stage());
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args) -> Result<PipelineAnswer> {
    info!("askdoc v{}", askdoc_core::VERSION);

    let config = AppConfig::load()?;
    let pipeline = Pipeline::from_config(config)?;
    pipeline.run(&args.pdf_path, &args.question).await
}
