//! nano-tcp-relay binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};

use nano_tcp_relay::cli::{Cli, EX_SOFTWARE, EX_USAGE};
use nano_tcp_relay::console::{spawn_stdin_reader, Console};
use nano_tcp_relay::logging::init_logging;
use nano_tcp_relay::relay::{EventLog, ListenerRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EX_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        },
    };

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{}", Cli::command().render_usage());
            return ExitCode::from(EX_USAGE);
        },
    };

    let events = match EventLog::stdout(config.settings.verbose) {
        Ok(events) => Arc::new(events),
        Err(e) => {
            error!(error = %e, "Failed to start event output");
            return ExitCode::from(EX_SOFTWARE);
        },
    };
    let registry = Arc::new(ListenerRegistry::new(&config, Arc::clone(&events)));

    for rule in &config.rules {
        if let Err(e) = registry.add(*rule).await {
            eprintln!("{e}");
            registry.shutdown_all().await;
            events.close();
            return ExitCode::from(EX_SOFTWARE);
        }
    }
    info!(host = %config.host, rules = config.rules.len(), "Relay started");

    let lines = match spawn_stdin_reader() {
        Ok(lines) => lines,
        Err(e) => {
            error!(error = %e, "Failed to start console input");
            registry.shutdown_all().await;
            events.close();
            return ExitCode::from(EX_SOFTWARE);
        },
    };

    let mut console = Console::new(Arc::clone(&registry), tokio::io::stdout());
    tokio::select! {
        result = console.run(lines) => {
            if let Err(e) = result {
                warn!(error = %e, "Console output failed");
            }
        },
        () = shutdown_signal() => info!("Signal received, shutting down"),
    }

    registry.shutdown_all().await;
    events.close();
    ExitCode::SUCCESS
}

/// Resolve on Ctrl-C, or on SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
