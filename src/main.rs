use clap::Parser;
use tracing_subscriber::EnvFilter;

use optchain_capture::cli::{Cli, Command};
use optchain_capture::{api, run};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { init, init_now } => run::run(&cli.config, &run::RunConfig { init, init_now }),
        Command::Once { force } => run::once(&cli.config, force),
        Command::Serve {
            host,
            port,
            pid_file,
        } => {
            let pid_file = pid_file.unwrap_or_else(run::registry::default_pid_file);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(api::serve(&host, port, &cli.config, pid_file))
        }
    }
}
