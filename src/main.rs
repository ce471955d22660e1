use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pgx_risk::config::Config;
use pgx_risk::explain::ExplanationService;
use pgx_risk::scenarios::{self, Scenario, ScenarioResult};
use pgx_risk::tables;
use pgx_risk::{
    BatchRunner, Evaluator, Explainer, Gene, NetworkMode, PatientReport, RiskLabel, Severity,
    UnitOutcome, VcfReader,
};

/// Pharmacogenomic drug risk classification from VCF genotype calls
#[derive(Parser, Debug)]
#[command(
    name = "pgx-risk",
    version,
    about = "Pharmacogenomic drug risk classification with cached explanations",
    long_about = r#"
Classifies drug risk from single-sample VCF genotype calls on six pharmacogenes:
CYP2D6, CYP2C19, CYP2C9, SLCO1B1, TPMT and DPYD.

Supported drugs: CODEINE, WARFARIN, CLOPIDOGREL, SIMVASTATIN, AZATHIOPRINE, FLUOROURACIL.
Explanations come from an OpenAI-compatible service when an API key is configured,
otherwise from static templates that cite the detected variants.
"#
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Maximum number of worker threads (0 = auto)
    #[arg(short = 'w', long, global = true)]
    max_workers: Option<usize>,

    /// Never call the explanation service
    #[arg(long, global = true)]
    offline: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a VCF file against one or more drugs
    Analyze {
        /// Patient VCF file (.vcf or .vcf.gz)
        #[arg(value_name = "VCF", value_hint = ValueHint::FilePath)]
        vcf: PathBuf,

        /// Drugs to assess (comma or space separated)
        #[arg(short, long, value_delimiter = ',', num_args = 1.., required = true)]
        drugs: Vec<String>,

        /// Batch deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },
    /// Run the built-in test scenarios
    Scenarios {
        /// Scenario names (all when omitted)
        names: Vec<String>,

        /// List scenarios without running them
        #[arg(long)]
        list: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List supported drugs and their primary genes
    Drugs,
    /// Generate shell completions
    Completions { shell: Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    if let Commands::Drugs = cli.command {
        list_drugs();
        return Ok(());
    }

    // Initialize logging
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(workers) = cli.max_workers {
        config.batch.max_workers = Some(workers);
    }
    if cli.offline {
        config.service.offline = true;
    }

    match cli.command {
        Commands::Analyze {
            vcf,
            drugs,
            deadline,
            json,
            output,
        } => {
            if deadline.is_some() {
                config.batch.deadline_secs = deadline;
            }
            run_analysis(&config, &vcf, &drugs, json, output.as_deref())
        }
        Commands::Scenarios { names, list, json } => {
            if list {
                list_scenarios();
                Ok(())
            } else {
                run_scenarios(&config, &names, json)
            }
        }
        Commands::Drugs | Commands::Completions { .. } => Ok(()),
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("pgx_risk={}", level))
        .with_writer(io::stderr)
        .init();
}

fn list_drugs() {
    println!("{}", style("Supported Drugs:").bold().cyan());
    println!();

    for drug in tables::supported_drugs() {
        let gene = tables::DRUG_RULES
            .get(drug)
            .map(|rule| rule.gene.to_string())
            .unwrap_or_default();
        println!("  {} - {}", style(drug).green().bold(), style(gene).yellow());
        println!("         {}", style(tables::monitoring(drug)).dim());
    }

    println!();
    println!("{}", style("Panel Genes:").bold().cyan());
    for gene in Gene::ALL.iter() {
        let phenotypes: Vec<&str> = gene.phenotypes().iter().map(|p| p.label_for(*gene)).collect();
        println!("  {} {}", style(gene).green(), style(phenotypes.join(", ")).dim());
    }
}

fn list_scenarios() {
    println!("{}", style("Built-in Scenarios:").bold().cyan());
    println!();
    for scenario in scenarios::SCENARIOS {
        println!(
            "  {} - {}",
            style(scenario.name).green().bold(),
            style(scenario.drugs.join(", ")).yellow()
        );
        println!("         {}", style(scenario.description).dim());
    }
}

fn build_explainer(config: &Config) -> (Explainer, NetworkMode) {
    let policy = config.retry_policy();
    if config.service.offline {
        info!("Offline mode, using template explanations");
        return (Explainer::new(None, policy), NetworkMode::Offline);
    }

    let service = connect_service(config);
    if service.is_none() {
        warn!("No explanation service available, using template explanations");
    }
    (Explainer::new(service, policy), NetworkMode::Online)
}

#[cfg(feature = "http")]
fn connect_service(config: &Config) -> Option<Arc<dyn ExplanationService>> {
    use pgx_risk::explain::http::HttpExplanationService;

    match HttpExplanationService::from_config(&config.service) {
        Ok(service) => Some(Arc::new(service) as Arc<dyn ExplanationService>),
        Err(e) => {
            warn!("Explanation service disabled: {:#}", e);
            None
        }
    }
}

#[cfg(not(feature = "http"))]
fn connect_service(_config: &Config) -> Option<Arc<dyn ExplanationService>> {
    None
}

fn build_evaluator(config: &Config) -> Evaluator {
    let (explainer, network) = build_explainer(config);
    let runner = BatchRunner::new(config.worker_cap()).with_deadline(config.deadline());
    Evaluator::new(Arc::new(explainer), runner).with_network(network)
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn run_analysis(
    config: &Config,
    vcf: &Path,
    drugs: &[String],
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let pb = spinner("Reading variant calls...")?;
    let variants = VcfReader::new()
        .read_path(vcf)
        .with_context(|| format!("Failed to read {}", vcf.display()))?;

    pb.set_message("Classifying drug risk...");
    let evaluator = build_evaluator(config);
    let report = evaluator.evaluate(&variants, drugs)?;
    pb.finish_and_clear();

    let rendered = serde_json::to_string_pretty(&report)?;
    if let Some(path) = output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if json {
        println!("{}", rendered);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn run_scenarios(config: &Config, names: &[String], json: bool) -> Result<()> {
    let selected: Vec<Scenario> = if names.is_empty() {
        scenarios::SCENARIOS.to_vec()
    } else {
        names
            .iter()
            .map(|name| {
                scenarios::find(name)
                    .copied()
                    .with_context(|| format!("Unknown scenario: {}", name))
            })
            .collect::<Result<_>>()?
    };

    let pb = spinner(&format!("Running {} scenarios...", selected.len()))?;
    let evaluator = Arc::new(build_evaluator(config));
    let runner = BatchRunner::new(config.worker_cap()).with_deadline(config.deadline());
    let results = scenarios::run_scenarios(evaluator, selected, &runner)?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_scenarios(&results);
    }

    Ok(())
}

fn styled_label(label: RiskLabel) -> StyledObject<&'static str> {
    let text = style(label.as_str());
    match label {
        RiskLabel::Safe => text.green(),
        RiskLabel::AdjustDosage => text.yellow(),
        RiskLabel::Toxic => text.red().bold(),
        RiskLabel::Ineffective => text.magenta().bold(),
        RiskLabel::Unknown => text.dim(),
    }
}

fn styled_severity(severity: Severity) -> StyledObject<&'static str> {
    let text = style(severity.as_str());
    match severity {
        Severity::None | Severity::Low => text.dim(),
        Severity::Moderate => text.yellow(),
        Severity::High | Severity::Critical => text.red(),
    }
}

fn print_report(report: &PatientReport) {
    println!(
        "{} {}  {}",
        style("Patient").bold().cyan(),
        style(&report.patient_id).bold(),
        style(&report.timestamp).dim()
    );
    if !report.parse.diagnostics.is_empty() {
        println!(
            "  {} {} records skipped while parsing",
            style("!").yellow(),
            report.parse.diagnostics.len()
        );
    }
    println!();

    for drug in &report.drugs {
        let risk = &drug.risk_assessment;
        let profile = drug
            .profile
            .as_ref()
            .map(|p| format!("{} {} ({})", p.primary_gene, p.diplotype, p.phenotype_label))
            .unwrap_or_else(|| "no panel gene".to_string());
        println!(
            "  {:<14} {:<24} {}  severity {}  confidence {:.2}",
            style(&drug.drug).bold(),
            profile,
            styled_label(risk.risk_label),
            styled_severity(risk.severity),
            risk.confidence
        );
        if let Some(from) = risk.phenocopied_from {
            println!(
                "  {:<14} {}",
                "",
                style(format!("phenocopied from {} to {}", from, risk.phenotype)).yellow()
            );
        }
        println!("  {:<14} {}", "", style(&drug.recommendation.dosing).dim());
        if !drug.recommendation.alternative_drugs.is_empty() {
            println!(
                "  {:<14} alternatives: {}",
                "",
                drug.recommendation.alternative_drugs.join(", ")
            );
        }
    }

    if !report.interactions.alerts.is_empty() {
        println!();
        println!("{}", style("Interactions").bold().cyan());
        for alert in &report.interactions.alerts {
            println!("  [{}] {}", styled_severity(alert.severity), alert.message);
        }
    }

    println!();
    println!("{}", style("Summary").bold().cyan());
    println!("  {}", report.narrative.text);
    println!();
    println!(
        "  Overall severity: {}",
        styled_severity(report.overall_severity)
    );
}

fn print_scenarios(results: &[ScenarioResult]) {
    for result in results {
        let status = match (&result.outcome, result.mismatches.is_empty()) {
            (UnitOutcome::Completed(_), true) => style("PASS").green().bold(),
            (UnitOutcome::Completed(_), false) => style("MISMATCH").yellow().bold(),
            (UnitOutcome::Failed(_), _) => style("FAILED").red().bold(),
            (UnitOutcome::TimedOut, _) => style("TIMEOUT").red().bold(),
        };
        println!("  {:<10} {}", status, style(result.name).bold());

        if let UnitOutcome::Completed(report) = &result.outcome {
            for drug in &report.drugs {
                println!(
                    "             {:<14} {}",
                    drug.drug,
                    styled_label(drug.risk_assessment.risk_label)
                );
            }
        }
        if let UnitOutcome::Failed(error) = &result.outcome {
            println!("             {}", style(error).red());
        }
        for mismatch in &result.mismatches {
            println!("             {}", style(mismatch).yellow());
        }
    }
}
