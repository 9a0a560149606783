use std::{
    env, fs,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    thread,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Keeps the non-blocking file writer alive for the lifetime of the process.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Set up tracing with an env-filter, stdout output and an optional daily
/// rolling log file under `LOG_DIR/<service>`.
pub fn init_tracing(service: &str) -> LogGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_root = PathBuf::from(env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()))
        .join(service);

    let mut file_guard = None;
    let file_layer = if fs::create_dir_all(&log_root).is_ok() {
        let appender = tracing_appender::rolling::daily(&log_root, format!("{service}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    if file_guard.is_some() {
        let retention_days = env_or("LOG_RETENTION_DAYS", 14u64);
        if retention_days > 0 {
            spawn_log_cleanup(log_root, retention_days);
        }
    }

    LogGuard { _file: file_guard }
}

/// Parse a typed environment value with a fallback.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn spawn_log_cleanup(log_root: PathBuf, retention_days: u64) {
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let interval = Duration::from_secs(60 * 60 * 6);

    thread::spawn(move || loop {
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            if let Ok(entries) = fs::read_dir(&log_root) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let stale = fs::metadata(&path)
                        .and_then(|meta| meta.modified())
                        .map(|modified| modified < cutoff)
                        .unwrap_or(false);
                    if stale {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        thread::sleep(interval);
    });
}

/// Bind on all interfaces for container compatibility.
pub async fn bind_listener(port: u16) -> TcpListener {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.expect("bind listener")
}

/// Resolve on ctrl-c or SIGTERM so axum can shut down gracefully.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
