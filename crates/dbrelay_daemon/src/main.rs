mod dispatch;
mod framing;
mod json;
mod protocol;
mod queue;
mod session;
mod worker;

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use dbrelay_core::{DbKind, Driver};

use dispatch::Dispatcher;
use protocol::ProtocolLoop;
use queue::CompletionQueue;
use session::SessionManager;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&shutdown_requested);

    let drivers = build_driver_registry();
    let session = Arc::new(SessionManager::new(drivers, args.max_result_rows));
    let queue = match CompletionQueue::new() {
        Ok(q) => Arc::new(q),
        Err(e) => fatal(&format!("failed to create completion queue self-pipe: {e}")),
    };

    let dispatcher = Dispatcher {
        session: session.clone(),
        queue: queue.clone(),
        shutdown_requested: shutdown_requested.clone(),
    };

    let stdin = std::io::stdin();
    let stdin_fd = stdin.as_raw_fd();
    let stdout = std::io::stdout();

    let mut protocol_loop = match ProtocolLoop::new(
        stdin_fd,
        stdout.lock(),
        dispatcher,
        queue,
        shutdown_requested.clone(),
    ) {
        Ok(p) => p,
        Err(e) => fatal(&format!("failed to initialize protocol loop: {e}")),
    };

    log::info!("dbrelay daemon {DAEMON_VERSION} starting on stdio");
    protocol_loop.run(stdin_fd);

    session.close_all();
    log::info!("dbrelay daemon shutting down");
}

/// `mysql://` and `mariadb://` connection strings both resolve to
/// `DbKind::MySql` (they share a wire protocol and driver), so the registry
/// carries one entry for it rather than a separate `DbKind::MariaDb` slot.
fn build_driver_registry() -> HashMap<DbKind, Box<dyn Driver>> {
    let mut drivers: HashMap<DbKind, Box<dyn Driver>> = HashMap::new();
    drivers.insert(DbKind::Sqlite, Box::new(dbrelay_driver_sqlite::SqliteDriver::new()));
    drivers.insert(DbKind::Postgres, Box::new(dbrelay_driver_postgres::PostgresDriver::new()));
    drivers.insert(DbKind::MySql, Box::new(dbrelay_driver_mysql::MysqlDriver::new()));
    drivers
}

/// Registers SIGINT/SIGTERM/SIGHUP to flip `shutdown_requested` — the same
/// flag the `shutdown` JSON-RPC method sets and the protocol loop samples
/// every readiness wake. Using `signal_hook::flag::register` rather than a
/// raw handler means the only thing that happens on the signal itself is an
/// atomic store; the loop still does all the actual work from its own
/// thread, so no signal-safety constraints leak into request handling.
fn install_signal_handlers(shutdown_requested: &Arc<AtomicBool>) {
    const SHUTDOWN_SIGNALS: [i32; 3] = [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGHUP,
    ];

    for sig in SHUTDOWN_SIGNALS {
        if let Err(e) = signal_hook::flag::register(sig, shutdown_requested.clone()) {
            log::warn!("failed to register signal handler for {sig}: {e}");
        }
    }

    // SIGPIPE is ignored so a broken output pipe surfaces as a normal write
    // error return value instead of killing the process (spec §6).
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

struct Args {
    max_result_rows: Option<usize>,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut max_result_rows = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdio" => {}
            "--max-result-rows" => {
                let value = args
                    .next()
                    .unwrap_or_else(|| fatal("--max-result-rows requires a value"));
                max_result_rows = Some(value.parse::<usize>().unwrap_or_else(|_| {
                    fatal(&format!("--max-result-rows: invalid row count '{value}'"))
                }));
            }
            "-h" | "--help" => {
                print_help();
                process::exit(0);
            }
            "-v" | "--version" => {
                println!("dbrelay-daemon {DAEMON_VERSION}");
                process::exit(0);
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    Args { max_result_rows }
}

fn print_help() {
    println!("dbrelay-daemon {DAEMON_VERSION}");
    println!();
    println!("A JSON-RPC gateway daemon for SQLite, PostgreSQL, and MySQL.");
    println!("Speaks newline-delimited JSON-RPC 2.0 over stdin/stdout.");
    println!();
    println!("Usage: dbrelay-daemon [--stdio] [--max-result-rows N] [-h|--help] [-v|--version]");
    println!();
    println!("Options:");
    println!("  --stdio               Serve JSON-RPC over stdin/stdout (default, only mode)");
    println!("  --max-result-rows N   Override the default row cap for query results");
}

fn fatal(message: &str) -> ! {
    eprintln!("Error: {message}");
    process::exit(1)
}
