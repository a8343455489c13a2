/// Entry point for the vigil probe engine
///
/// Parses the command line, loads the configuration, installs logging and
/// hands control to the controller until a shutdown signal arrives.
use clap::Parser;
use std::path::PathBuf;

use vigil::config::Config;
use vigil::controller::Controller;
use vigil::logger;

/// Define command line arguments using clap
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "VIGIL_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let conf = match Config::new(&cli.config) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Failed to initialize configuration: {:?}", e);
            std::process::exit(1);
        }
    };

    let logger = logger::init(conf.debug);
    tracing::debug!("Config path: {:?}", cli.config);

    let result = Controller::new(conf).start().await;
    if let Err(e) = &result {
        tracing::error!("vigil stopped: {:?}", e);
    }
    drop(logger);
    if result.is_err() {
        std::process::exit(1);
    }
}
