use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::str::FromStr;
use vulnhunter_pipeline::{
    AnalysisJob, Layer, Pipeline, PipelineReport, Severity, Target, VERSION,
};

#[derive(Parser)]
#[command(name = "vulnhunter")]
#[command(about = "Multi-tool smart contract vulnerability analysis")]
#[command(version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis pipeline against a contract source tree.
    Analyze(AnalyzeArgs),

    /// List the registered tool adapters and their layers.
    Tools,
}

#[derive(clap::Args)]
struct AnalyzeArgs {
    /// Directory containing the Solidity sources to analyze.
    #[arg(short, long)]
    input: PathBuf,

    /// Analysis layers to run (static, fuzzing, symbolic, formal, ai).
    #[arg(short, long, value_delimiter = ',', default_values_t = ["static".to_string(), "fuzzing".to_string()])]
    layers: Vec<String>,

    /// Per-layer timeout in seconds; defaults to each tool's own budget.
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum concurrently running tools.
    #[arg(long, default_value_t = 4)]
    max_workers: usize,

    /// Confidence a group must reach before exploit validation is attempted.
    #[arg(long, default_value_t = 0.7)]
    confidence_threshold: f64,

    /// Drop groups below this severity from the report.
    #[arg(long, value_enum, default_value_t = MinSeverity::Informational)]
    min_severity: MinSeverity,

    /// Skip exploit validation even for qualifying groups.
    #[arg(long)]
    no_exploit: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,

    /// Write the report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum OutputFormat {
    Summary,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum MinSeverity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl From<MinSeverity> for Severity {
    fn from(value: MinSeverity) -> Self {
        match value {
            MinSeverity::Informational => Severity::Informational,
            MinSeverity::Low => Severity::Low,
            MinSeverity::Medium => Severity::Medium,
            MinSeverity::High => Severity::High,
            MinSeverity::Critical => Severity::Critical,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_analyze(args))
        }
        Commands::Tools => run_tools(),
    }
}

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    if !args.input.is_dir() {
        anyhow::bail!("input path is not a directory: {}", args.input.display());
    }

    let layers = args
        .layers
        .iter()
        .map(|name| Layer::from_str(name).map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<Layer>>>()?;

    let mut job = AnalysisJob::new(Target::Source {
        root: args.input.clone(),
    })
    .with_layers(layers)
    .with_max_workers(args.max_workers)
    .with_confidence_threshold(args.confidence_threshold)
    .with_min_severity(args.min_severity.into());
    if let Some(secs) = args.timeout {
        job = job.with_timeout_per_layer(std::time::Duration::from_secs(secs));
    }
    if args.no_exploit {
        job.exploit.enabled = false;
    }

    println!(
        "{} {}",
        "Analyzing".bright_blue().bold(),
        args.input.display()
    );

    let report = Pipeline::new()
        .run(&job)
        .await
        .context("analysis pipeline failed")?;

    let rendered = match args.format {
        OutputFormat::Json => report.to_json()?,
        OutputFormat::Summary => render_colored_summary(&report),
    };

    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("{} {}", "Report written to".bright_green(), path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}

fn run_tools() -> Result<()> {
    let pipeline = Pipeline::new();
    println!("{}", "Registered tool adapters:".bright_blue().bold());
    for layer in Layer::all() {
        for adapter in pipeline.registry().for_layer(layer) {
            println!(
                "  [{}] {} (trust {:.2}, timeout {}s)",
                layer,
                adapter.name(),
                adapter.trust_weight(),
                adapter.default_timeout().as_secs()
            );
        }
    }
    Ok(())
}

fn render_colored_summary(report: &PipelineReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n{}\n",
        format!(
            "Analysis of {} — risk score {:.1}/10",
            report.target, report.risk_score
        )
        .bold(),
        "=".repeat(60)
    ));

    for summary in report.layers.values() {
        out.push_str(&format!(
            "  [{}] {}: {:?} in {}ms, {} raw findings\n",
            summary.layer, summary.tool, summary.status, summary.duration_ms, summary.finding_count
        ));
    }

    if report.groups.is_empty() {
        out.push_str(&format!("\n{}\n", "No vulnerabilities found".green()));
    } else {
        out.push_str(&format!(
            "\n{}\n",
            format!("{} vulnerability group(s):", report.groups.len()).yellow()
        ));
        for group in &report.groups {
            let severity = match group.severity {
                Severity::Critical | Severity::High => group.severity.to_string().red().bold(),
                Severity::Medium => group.severity.to_string().yellow(),
                _ => group.severity.to_string().normal(),
            };
            let location = group
                .location
                .as_ref()
                .map(|loc| format!("{}:{}-{}", loc.file, loc.start_line, loc.end_line))
                .unwrap_or_else(|| "<unresolved>".to_string());
            out.push_str(&format!(
                "  {} [{}] {} at {}\n      confidence {:.2}, tools: {}{}\n",
                group.id,
                severity,
                group.class.bold(),
                location,
                group.confidence,
                group.tools().join(", "),
                group
                    .swc
                    .as_ref()
                    .map(|swc| format!(", {swc}"))
                    .unwrap_or_default()
            ));
        }
    }

    if !report.unconfirmed_outliers.is_empty() {
        out.push_str(&format!(
            "\n{}\n",
            format!(
                "{} unconfirmed outlier(s) for manual review:",
                report.unconfirmed_outliers.len()
            )
            .dimmed()
        ));
        for finding in &report.unconfirmed_outliers {
            out.push_str(&format!(
                "  {} {} ({})\n",
                finding.id.as_str(),
                finding.class,
                finding.tool
            ));
        }
    }

    for attempt in &report.exploit_attempts {
        out.push_str(&format!(
            "  exploit validation {}: {:?}\n",
            attempt.group_id, attempt.verdict
        ));
    }

    out
}
