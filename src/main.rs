use std::io::IsTerminal;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tracing::{info, warn};

use talking_head_runner::config::{Config, Settings, DEFAULT_CONFIG_FILE};
use talking_head_runner::exit_err;
use talking_head_runner::models::ModelKind;
use talking_head_runner::remote::RemoteClient;
use talking_head_runner::runner::{run_remote_comparison, RemoteModelPlan};
use talking_head_runner::telemetry::init_telemetry;

/// Runs SadTalker and Wav2Lip on their serverless endpoints and compares time and cost.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Do not write the comparison report to disk
    #[arg(long)]
    no_save: bool,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_telemetry(!args.no_color && std::io::stderr().is_terminal());

    let config = match Config::from_toml(&args.config_file) {
        Ok(file_config) => Config::from(file_config).merge(&mut args.opt_config),
        Err(err) => {
            if args.config_file == DEFAULT_CONFIG_FILE && !Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::from(&mut args.opt_config)
            } else {
                exit_err!(1, "{:#}", err);
            }
        }
    };

    let settings = match Settings::try_from(config) {
        Ok(settings) => settings,
        Err(err) => exit_err!(1, "{}", err),
    };
    let client = match RemoteClient::new(settings.api_base_url.clone(), &settings.api_key) {
        Ok(client) => client,
        Err(err) => exit_err!(1, "{}", err),
    };

    info!(
        sadtalker = %settings.sadtalker_endpoint,
        wav2lip = %settings.wav2lip_endpoint,
        image = %settings.image_url,
        "Starting comparison"
    );
    let report = run_remote_comparison(
        &client,
        &RemoteModelPlan::from_settings(&settings, ModelKind::SadTalker),
        &RemoteModelPlan::from_settings(&settings, ModelKind::Wav2Lip),
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if !args.no_save {
        match report.save(&settings.report_dir) {
            Ok(path) => info!(path = %path.display(), "Saved comparison report"),
            Err(err) => warn!("Failed to save comparison report: {err:#}"),
        }
    }

    if !report.is_compared() {
        std::process::exit(2);
    }
    Ok(())
}
