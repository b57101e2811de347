use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ni_porep_pipeline::cli::print_stdout;
use ni_porep_pipeline::config::{load_config, ParameterSource, PipelineSettings};
use ni_porep_pipeline::error::{FailureKind, PipelineError, RunFailure};
use ni_porep_pipeline::parameters::{
    BuiltinParameters, ParameterPaths, ParameterResolver, StageParameters,
};
use ni_porep_pipeline::pipeline::{Outcome, PipelineDriver, StageSequence, VerificationPolicy};
use ni_porep_pipeline::run_config::{ConfigError, RunConfig, RunInputs};
use ni_porep_pipeline::stage::CommandInvoker;

#[derive(Parser)]
#[command(name = "ni-porep", version, about = "Run the NI-PoRep pipeline for one sector")]
struct Cli {
    /// Path to the operator configuration file
    #[arg(long, global = true, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seal and prove one CC sector
    Run(RunArgs),
    /// Print the stage sequence with every input binding
    Plan,
    /// Print the parameters resolved for a sector size
    Params {
        #[arg(long)]
        sector_size: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON or TOML file with the run inputs; flags override its values
    #[arg(long, value_name = "FILE")]
    inputs: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    output_dir: Option<PathBuf>,

    #[arg(long, value_name = "HEX")]
    porep_id: Option<String>,

    #[arg(long, value_name = "HEX")]
    replica_id: Option<String>,

    #[arg(long, value_name = "BYTES")]
    sector_size: Option<u64>,

    #[arg(long, value_name = "HEX")]
    seed: Option<String>,

    /// Aggregate even after the SNARK proof failed verification
    #[arg(long)]
    proceed_on_failed_verification: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_config(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::from(FailureKind::Config.exit_code());
        }
    };

    // Logs go to stderr; stdout carries the JSON report.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match execute(cli.command, &settings) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(failure_kind(&e).exit_code())
        }
    }
}

fn execute(command: Command, settings: &PipelineSettings) -> anyhow::Result<ExitCode> {
    let invoker = CommandInvoker::from_settings(&settings.stages);

    match command {
        Command::Plan => {
            let sequence = StageSequence::ni_porep();
            sequence.validate().map_err(PipelineError::from)?;
            print!("{sequence}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Params { sector_size } => {
            let resolver = resolver(settings, &invoker);
            let params = resolver
                .resolve(sector_size)
                .map_err(PipelineError::from)?;
            print_stdout(&params)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let config = run_config(&args)?;
            let policy = if args.proceed_on_failed_verification {
                VerificationPolicy::Proceed
            } else {
                settings.verification.on_failure
            };
            let resolver = resolver(settings, &invoker);
            let driver = PipelineDriver::new(&invoker, StageSequence::ni_porep())
                .map_err(PipelineError::from)?
                .with_policy(policy);

            let report = driver.run(&config, resolver.as_ref())?;
            print_stdout(&report)?;
            match report.outcome {
                Outcome::VerificationFailed { stage } => {
                    error!("Proof produced but rejected by {stage}");
                    Ok(ExitCode::from(FailureKind::VerificationFailed.exit_code()))
                }
                Outcome::Verified | Outcome::Unverified => {
                    info!("Sector sealed and proven");
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}

fn run_config(args: &RunArgs) -> Result<RunConfig, ConfigError> {
    let from_file = match &args.inputs {
        Some(path) => RunInputs::from_file(path)?,
        None => RunInputs::default(),
    };
    let from_flags = RunInputs {
        output_dir: args.output_dir.clone(),
        porep_id: args.porep_id.clone(),
        replica_id: args.replica_id.clone(),
        sector_size: args.sector_size,
        seed: args.seed.clone(),
    };
    RunConfig::try_from(from_file.merge(from_flags))
}

fn resolver<'a>(
    settings: &PipelineSettings,
    invoker: &'a CommandInvoker,
) -> Box<dyn ParameterResolver + 'a> {
    let paths = ParameterPaths::new(settings.parameters.cache_dir.clone());
    match settings.parameters.source {
        ParameterSource::Builtin => Box::new(BuiltinParameters::new(paths)),
        ParameterSource::Stage => Box::new(StageParameters::new(invoker, paths)),
    }
}

fn failure_kind(error: &anyhow::Error) -> FailureKind {
    if let Some(failure) = error.downcast_ref::<RunFailure>() {
        failure.kind()
    } else if let Some(error) = error.downcast_ref::<PipelineError>() {
        error.kind()
    } else if error.downcast_ref::<ConfigError>().is_some() {
        FailureKind::Config
    } else {
        FailureKind::Io
    }
}
