use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cellcomp::config::{DEFAULT_CONFIG_FILE, Settings};
use cellcomp::controller::Controller;
use cellcomp::loader::DynamicLibraryLoader;
use cellcomp::pipeline::CommandToolchain;

fn run() -> cellcomp::Result<()> {
    let config_path = std::env::var("CELLCOMP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let settings = Settings::load(&config_path)?;
    info!(config = %config_path.display(), modules = settings.modules.len(), "settings loaded");

    let controller = Controller::new(
        &settings,
        CommandToolchain::from_settings(&settings),
        DynamicLibraryLoader,
    );
    controller.init(&settings.include_directory)?;
    for module in &settings.modules {
        controller.load_from(
            &module.source_dir,
            &module.build_dir,
            &module.name,
            module.version.as_deref(),
        )?;
    }

    let summaries = controller.catalog().summaries()?;
    match serde_json::to_string_pretty(&summaries) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "unable to print catalog"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "composition failed");
            ExitCode::FAILURE
        }
    }
}
