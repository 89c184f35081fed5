mod logging;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fattura_core::{
    config::Config,
    detect_version,
    render::Renderer,
    rules::{RuleExecutor, RuleSetCompiler},
    signature::RemoteSignatureVerifier,
    validation::Validator,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "fattura")]
#[command(about = "FatturaPA e-invoice validation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected version of each invoice.
    Detect {
        #[arg(long, required = true, num_args = 1..)]
        invoice: Vec<PathBuf>,
    },
    /// Structural and signature validation.
    Validate {
        #[arg(long, required = true, num_args = 1..)]
        invoice: Vec<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Evaluate a Schematron rule set against an invoice.
    Rules {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Render an invoice to HTML.
    Render {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_properties_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn read_invoice(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading invoice {}", path.display()))
}

fn detect(invoices: &[PathBuf]) -> Result<ExitCode> {
    for path in invoices {
        let document = read_invoice(path)?;
        let version =
            detect_version(&document).with_context(|| format!("detecting {}", path.display()))?;
        println!("{}\t{version}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn validate(invoices: Vec<PathBuf>, config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    let verifier = match RemoteSignatureVerifier::from_config(&config) {
        Ok(verifier) => Some(verifier),
        Err(e) => {
            debug!(error = %e, "signature verification disabled");
            None
        }
    };
    let validator = Arc::new(Validator::from_config(&config, verifier)?);

    let mut tasks = tokio::task::JoinSet::new();
    for (index, path) in invoices.into_iter().enumerate() {
        let validator = Arc::clone(&validator);
        tasks.spawn(async move {
            let result = validator
                .validate_file(&path)
                .await
                .with_context(|| format!("validating {}", path.display()));
            (index, path, result)
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, path, result) = joined.context("validation task failed")?;
        reports.push((index, path, result?));
    }
    reports.sort_by_key(|(index, _, _)| *index);

    let all_valid = reports.iter().all(|(_, _, result)| result.is_valid());
    let payload: Vec<serde_json::Value> = reports
        .iter()
        .map(|(_, path, result)| {
            serde_json::json!({
                "invoice": path.display().to_string(),
                "valid": result.is_valid(),
                "result": result,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&payload)?);
    info!(count = payload.len(), all_valid, "validation finished");

    Ok(if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn rules(invoice: &Path, rules: &Path, config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    let compiler = RuleSetCompiler::from_config(&config)?;
    let executor = RuleExecutor::configured(&config, compiler.transformer().clone())?;

    let compiled = compiler
        .compile(rules)
        .with_context(|| format!("compiling {}", rules.display()))?;
    let findings = executor.execute(&read_invoice(invoice)?, &compiled)?;
    println!("{}", serde_json::to_string_pretty(&findings)?);

    Ok(if findings.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render(invoice: &Path, output: Option<&Path>, config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    let renderer = Renderer::from_config(&config)?;
    let html = renderer
        .render_file(invoice)
        .with_context(|| format!("rendering {}", invoice.display()))?;
    match output {
        Some(path) => std::fs::write(path, &html)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{}", String::from_utf8_lossy(&html)),
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    logging::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect { invoice } => detect(&invoice),
        Commands::Validate { invoice, config } => validate(invoice, config.as_deref()).await,
        Commands::Rules {
            invoice,
            rules: rule_set,
            config,
        } => rules(&invoice, &rule_set, config.as_deref()),
        Commands::Render {
            invoice,
            output,
            config,
        } => render(&invoice, output.as_deref(), config.as_deref()),
    }
}
