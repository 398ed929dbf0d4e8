use clap::Parser;
use clientdesk_core::settings::{env_true, resolve_setting};
use clientdesk_core::{AgentRoster, SessionTable};
use clientdesk_storage::DocumentStore;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

mod auth;
mod live;
mod routes;

use routes::{router, AppState};

const DEFAULT_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DB: &str = ".clientdesk/desk.sqlite3";
const DEFAULT_SESSIONS: &str = ".clientdesk/sessions.json";
const DEFAULT_LOG_DIR: &str = ".clientdesk/logs";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    db_path: PathBuf,
    sessions_path: PathBuf,
    roster: AgentRoster,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "clientdesk-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    db: String,
    #[arg(long, default_value = "")]
    sessions: String,
    /// Comma separated agent roster; empty accepts any agent name.
    #[arg(long, default_value = "")]
    agents: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let documents = match DocumentStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(event = "db_open_error", path = %config.db_path.display(), error = %err);
            return;
        }
    };
    let sessions = match SessionTable::load(&config.sessions_path) {
        Ok(table) => table,
        Err(err) => {
            error!(event = "sessions_error", path = %config.sessions_path.display(), error = %err);
            return;
        }
    };
    if sessions.is_empty() {
        warn!(
            event = "no_sessions",
            path = %config.sessions_path.display(),
            "every request will be rejected"
        );
    }

    let app = router(AppState::new(documents, sessions, config.roster.clone()));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        db = %config.db_path.display(),
        agents = config.roster.names().len()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
    info!(event = "hub_stop");
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: setting_or(&args.addr, "CLIENTDESK_ADDR", DEFAULT_ADDR),
        db_path: PathBuf::from(setting_or(&args.db, "CLIENTDESK_DB", DEFAULT_DB)),
        sessions_path: PathBuf::from(setting_or(
            &args.sessions,
            "CLIENTDESK_SESSIONS",
            DEFAULT_SESSIONS,
        )),
        roster: AgentRoster::from_csv(&setting_or(&args.agents, "CLIENTDESK_AGENTS", "")),
        debug: args.debug || env_true("CLIENTDESK_DEBUG"),
        log_dir: setting_or(&args.log_dir, "CLIENTDESK_LOG_DIR", DEFAULT_LOG_DIR),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CLIENTDESK_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Mirrors every log line to stdout and, when configured, the hub log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("clientdesk-hub.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

/// Flag value first, then the environment, then the built-in default.
fn setting_or(flag: &str, env_key: &str, default: &str) -> String {
    resolve_setting(flag, env_key).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_default() {
        assert_eq!(
            setting_or("0.0.0.0:9000", "CLIENTDESK_TEST_UNSET_ADDR", DEFAULT_ADDR),
            "0.0.0.0:9000"
        );
        assert_eq!(
            setting_or(" ", "CLIENTDESK_TEST_UNSET_ADDR", DEFAULT_ADDR),
            DEFAULT_ADDR
        );
    }

    #[test]
    fn empty_log_dir_disables_file() {
        let guard = open_log_file("").expect("guard");
        assert!(guard.file.is_none());

        let dir = tempfile::TempDir::new().expect("temp dir");
        let guard = open_log_file(&dir.path().to_string_lossy()).expect("guard");
        assert!(guard.file.is_some());
        assert!(dir.path().join("clientdesk-hub.log").exists());
    }
}
