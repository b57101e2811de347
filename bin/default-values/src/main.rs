//! `default-values` stage: looks up the parameter counts for a sector size.

use serde::Deserialize;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ni_porep_pipeline::cli::{parse_stdin, print_stdout};
use ni_porep_pipeline::parameters::{default_values, DefaultValuesOutput};

#[derive(Debug, Deserialize)]
struct DefaultValuesParameters {
    sector_size: u64,
}

fn run() -> anyhow::Result<()> {
    let params: DefaultValuesParameters = parse_stdin()?;
    debug!("{:?}", params);

    let values = default_values(params.sector_size)
        .ok_or_else(|| anyhow::anyhow!("unknown sector size {}", params.sector_size))?;

    print_stdout(DefaultValuesOutput {
        num_layers: values.num_layers,
        num_porep_challenges: values.num_challenges_per_partition * values.num_partitions,
        num_porep_partitions: values.num_partitions,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
