use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::info;

use levelcast::audio;
use levelcast::cli::{Args, Command};
use levelcast::config::Config;
use levelcast::app;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.subcommand();

    // Full-screen and raw-mode front ends only log when asked to, so the
    // output does not tear through the meter.
    let interactive = matches!(command, Command::Run | Command::Capture | Command::View);
    if !interactive || std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("levelcast=info".parse()?),
            )
            .init();
    }

    // Load or create config
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    config.merge_args(&args);

    info!("Starting levelcast: {:?}", command);

    match command {
        Command::Run => app::run(config).await,
        Command::Relay => app::relay(config).await,
        Command::Capture => app::capture(config).await,
        Command::View => app::view(config).await,
        Command::ListSources => {
            for (name, state) in audio::list_sources()? {
                println!("{}\t{}", name, state);
            }
            Ok(())
        }
        Command::InitConfig => {
            let path = Config::init_default_config()?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Args::command(), "levelcast", &mut std::io::stdout());
            Ok(())
        }
    }
}
