mod cli;
mod commands;
mod error;

use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so buffered file output is flushed.
    let _guard = init_tracing(cli.global.verbose, cli.global.log_json, cli.global.log_file.as_deref());

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let level = match verbosity {
        0 => "info",
        1 => "rehau_bridge=debug,rehau_bridge_core=debug,rehau_bridge_api=debug,info",
        2 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(filter())
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter())
                .boxed(),
        );
    }

    let guard = log_file.map(|path| {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name().map_or_else(|| "rehau-bridge.log".into(), |n| n.to_os_string());
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter())
                .boxed(),
        );
        guard
    });

    tracing_subscriber::registry().with(layers).init();
    guard
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "rehau-bridge", &mut std::io::stdout());
            Ok(())
        }
        Command::Config(cmd) => commands::config_cmd::handle(&cmd, &cli.global),
        Command::Topics(args) => commands::topics::handle(&args, &cli.global).await,
        Command::Run => commands::run::handle(&cli.global).await,
    }
}
