use std::io::Read;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use transit_pln::{Analyzer, AnalyzerConfig};

#[derive(Parser)]
#[command(
    name = "transit-pln",
    about = "Rule-based analysis of São Paulo bus questions: topic, entities, problems",
    version
)]
struct Cli {
    /// File paths to analyze (reads stdin if none provided)
    files: Vec<String>,

    /// Emit the full analysis record as JSON instead of the rendered report
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let analyzer = Analyzer::new(AnalyzerConfig::sao_paulo())?;

    if cli.files.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read stdin")?;
        emit(&analyzer, &input, cli.json)?;
    } else {
        for path in &cli.files {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
            emit(&analyzer, &text, cli.json)?;
        }
    }
    Ok(())
}

fn emit(analyzer: &Analyzer, text: &str, json: bool) -> anyhow::Result<()> {
    let record = analyzer.compose(text);
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record.rendered_text);
    }
    Ok(())
}
