mod db;
mod engine;
mod ir;
mod model;
mod npe;
mod rules;
#[cfg(test)]
mod test_harness;
mod vna;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Invocation, PropertyBag, ReportingDescriptor, Run, Sarif, Tool, ToolComponent, SCHEMA_URL,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::engine::{AnalysisContext, Engine};
use crate::model::load_model;

/// CLI arguments for nullscan execution.
#[derive(Parser, Debug)]
#[command(
    name = "nullscan",
    about = "Deterministic SARIF null-dereference reports for JVM method models.",
    version
)]
struct Cli {
    /// Method model JSON produced by the front end.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// Disable the known-value side map; branch refinements still rewrite
    /// slots, but knowledge is not carried to later loads of the same value.
    #[arg(long)]
    no_track_value_numbers: bool,
    /// Log filter directive, e.g. `nullscan=debug`.
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    run(cli)
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = if cli.quiet {
        EnvFilter::new("off")
    } else if let Some(directive) = &cli.log {
        EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter: {directive}"))?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }

    let started_at = Instant::now();
    let load_started_at = Instant::now();
    let model = load_model(&cli.input)?;
    let load_duration_ms = load_started_at.elapsed().as_millis();
    let class_count = model.classes.len();
    let method_count = model.method_count();
    if model.contracts.is_empty() {
        debug!("model carries no contract database; call-site checks fall back to annotations");
    }

    let context = AnalysisContext::new(model, !cli.no_track_value_numbers);
    let analysis_started_at = Instant::now();
    let output = Engine::new().analyze(&context)?;
    let analysis_duration_ms = analysis_started_at.elapsed().as_millis();

    let invocation_stats = InvocationStats {
        load_duration_ms,
        analysis_duration_ms,
        class_count,
        method_count,
        result_count: output.results.len(),
    };
    let invocation = build_invocation(&invocation_stats);
    let sarif = build_sarif(invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} load_ms={} analysis_ms={} classes={} methods={} results={}",
            started_at.elapsed().as_millis(),
            load_duration_ms,
            analysis_duration_ms,
            class_count,
            method_count,
            invocation_stats.result_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    load_duration_ms: u128,
    analysis_duration_ms: u128,
    class_count: usize,
    method_count: usize,
    result_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("nullscan.load_ms".to_string(), json!(stats.load_duration_ms));
    properties.insert(
        "nullscan.analysis_ms".to_string(),
        json!(stats.analysis_duration_ms),
    );
    properties.insert("nullscan.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "nullscan.method_count".to_string(),
        json!(stats.method_count),
    );
    properties.insert(
        "nullscan.result_count".to_string(),
        json!(stats.result_count),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<serde_sarif::sarif::Result>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("nullscan")
            .information_uri("https://github.com/exoego/nullscan")
            .build()
    } else {
        ToolComponent::builder()
            .name("nullscan")
            .information_uri("https://github.com/exoego/nullscan")
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
