use clap::Parser;
use sprelay::daemon::{self, platform_detacher};
use sprelay::forwarder::{Forwarder, TracingObserver};
use sprelay::logging;
use sprelay::settings::{self, Settings, DEFAULT_CONFIG_PATH};
use sprelay_core::error::RelayError;
use sprelay_sp::SpTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sprelay", version)]
#[command(about = "Republishes every message received on a SUB endpoint to a PUB endpoint", long_about = None)]
#[command(after_help = "Environment:\n  \
    SPRELAY_ENV  config table to read (default: development)\n  \
    RUST_LOG     log filter (default: info)")]
struct Args {
    /// Config file
    #[arg(short = 'c', value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Detach from the terminal and write the PID file
    #[arg(short = 'd')]
    daemon: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    logging::init();

    let env = settings::environment_name();
    let settings = Settings::load(&args.config, &env);

    // Fork before the runtime and the publisher workers start any thread
    if args.daemon {
        if let Err(e) = daemon::daemonize(&platform_detacher(), &settings.pidfile) {
            error!("Daemonization failed: {}", e);
            eprintln!("sprelay: cannot daemonize: {}", e);
            return ExitCode::from(1);
        }
    }

    let runtime = match compio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("sprelay: cannot start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(serve(&settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Cannot set up endpoints: {}", e);
            eprintln!("sprelay: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn serve(settings: &Settings) -> Result<(), RelayError> {
    let transport = SpTransport::new(settings.maxprocs, settings.socket_options.clone());
    let mut forwarder = Forwarder::bind(&transport, &settings.pub_endpoint, &settings.sub_endpoint)
        .await?
        .with_observer(TracingObserver::new());

    info!("sprelay running ({} environment)", settings.env);
    match forwarder.run().await {}
}
