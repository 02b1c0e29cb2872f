use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use swath_dispatch::config::{parse_categories, PartialConfig, PartialConverter};
use swath_dispatch::constants;
use swath_dispatch::infra::ProcessConverter;
use swath_dispatch::observability::logging;
use swath_dispatch::{BatchDispatcher, DispatchConfig, DispatchError, DispatchReport, ErrorPolicy};

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Hand MODIS swath arrays to an external converter, one file at a time")]
#[command(version = "0.1.0")]
struct Cli {
    /// Input root whose immediate children are sample directories
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output root, passed verbatim to the converter
    #[arg(long)]
    output: Option<PathBuf>,
    /// Comma-separated category labels, in dispatch order (default: daylight,night,corrupt)
    #[arg(long)]
    categories: Option<String>,
    /// Maximum number of converter processes in flight (default: 1)
    #[arg(long)]
    concurrency: Option<usize>,
    /// What to do when a conversion fails: continue or abort
    #[arg(long)]
    on_error: Option<ErrorPolicy>,
    /// Converter executable
    #[arg(long)]
    converter: Option<String>,
    /// Extra leading converter argument (repeatable)
    #[arg(long = "converter-arg", allow_hyphen_values = true)]
    converter_args: Vec<String>,
    /// Kill a conversion that runs longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// TOML configuration file (also read from DISPATCH_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for daily rolling JSON logs
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// List the files that would be converted and exit
    #[arg(long)]
    dry_run: bool,
    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            input_root: self.input.clone(),
            output_root: self.output.clone(),
            categories: self.categories.as_deref().map(parse_categories),
            concurrency: self.concurrency,
            on_error: self.on_error,
            converter: PartialConverter {
                program: self.converter.clone(),
                args: (!self.converter_args.is_empty()).then(|| self.converter_args.clone()),
                timeout_secs: self.timeout_secs,
            },
            log_dir: self.log_dir.clone(),
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<DispatchConfig, DispatchError> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var(constants::CONFIG_ENV_VAR).ok().map(PathBuf::from));

    let file = match config_path {
        Some(path) => PartialConfig::from_file(&path)?,
        None => PartialConfig::default(),
    };

    let config = file.merge(cli.overrides()).resolve()?;
    config.validate()?;
    Ok(config)
}

fn print_summary(report: &DispatchReport) {
    println!("\n📊 Dispatch results ({}):", report.run_id);
    println!("   Attempted: {}", report.attempted);
    println!("   Succeeded: {}", report.succeeded);
    println!("   Failed: {}", report.failed);
    if let Some(duration) = report.duration() {
        println!("   Duration: {:.1}s", duration.num_milliseconds() as f64 / 1000.0);
    }
    if report.halted {
        println!("   ⏹️  Stopped early after a failure (--on-error abort)");
    }

    if !report.failures.is_empty() {
        println!("\n⚠️  Failed files:");
        for failure in &report.failures {
            println!("   - {}: {}", failure.input_path.display(), failure.error);
        }
    }
}

async fn run(cli: &Cli, config: DispatchConfig) -> anyhow::Result<u8> {
    let converter = Arc::new(ProcessConverter::from_config(&config.converter));
    let dispatcher = BatchDispatcher::new(config, converter);

    if cli.dry_run {
        let plan = dispatcher.plan()?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            for item in &plan {
                println!("{}", item.input_path.display());
            }
            println!("\n🔍 {} file(s) would be converted", plan.len());
        }
        return Ok(constants::EXIT_OK);
    }

    let report = dispatcher.run().await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(constants::EXIT_CONFIG_ERROR);
        }
    };

    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = logging::init_logging(config.log_dir.as_deref());

    match run(&cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Dispatch failed: {:#}", e);
            let configuration = e
                .downcast_ref::<DispatchError>()
                .map(DispatchError::is_configuration)
                .unwrap_or(false);
            if configuration {
                ExitCode::from(constants::EXIT_CONFIG_ERROR)
            } else {
                ExitCode::from(constants::EXIT_ITEM_FAILURES)
            }
        }
    }
}
