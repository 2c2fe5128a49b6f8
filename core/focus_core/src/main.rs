mod activity;
mod api;
mod category;
mod decision;
mod domain;
mod model;
mod store;
mod tabs;
mod tick;
mod usage;

use clap::Parser;
use rusqlite::Connection;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::info;

const DEFAULT_PORT: u16 = 17600;
const MIN_TICK_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "focus_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17600
    /// - ip (implies port 17600), e.g. 127.0.0.1
    /// - localhost:port
    #[arg(long, default_value = "127.0.0.1:17600")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/focus-core.db")]
    db: PathBuf,

    /// Tick period (milliseconds). Each tick counts at most one second.
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// A tab report older than this is treated as "no active tab" (seconds).
    ///
    /// Must be >= the browser extension heartbeat, so a quiet tab keeps counting.
    #[arg(long, default_value_t = 120)]
    tab_stale_seconds: u64,

    /// Internal page shown for blocked sites; `?site=<domain>` is appended.
    #[arg(long, default_value = "chrome-extension://focus-guard/blocked.html")]
    blocked_page: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "focus_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let blocked_page = args.blocked_page.trim().to_string();
    if blocked_page.is_empty() {
        anyhow::bail!("--blocked-page must not be empty");
    }

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&args.db)?;
    store::init_db(&conn)?;
    store::migrate_legacy_records(&conn)?;
    let store = store::Store::new(conn);

    let tabs = Arc::new(tabs::TabBridge::new(Duration::from_secs(
        args.tab_stale_seconds,
    )));

    let ticker = tick::Ticker::new(
        store.clone(),
        tabs.clone(),
        tick::TickerConfig {
            period: Duration::from_millis(args.tick_ms.max(MIN_TICK_MS)),
            blocked_page: blocked_page.clone(),
        },
    );
    let ticker_task = tokio::spawn(ticker.run());

    let app = api::router(api::AppState {
        store,
        tabs,
        blocked_page: Arc::from(blocked_page),
    });

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    ticker_task.abort();
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        let ip = if host == "localhost" {
            Some(IpAddr::from([127, 0, 0, 1]))
        } else {
            // IPv6 without brackets, best effort: ::1:17600
            host.parse::<IpAddr>().ok()
        };
        if let Some(ip) = ip {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                    input,
                    DEFAULT_PORT
                )
            })?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_accepts_common_forms() {
        assert_eq!(
            parse_listen("127.0.0.1:18000").unwrap(),
            "127.0.0.1:18000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("0.0.0.0").unwrap().port(), DEFAULT_PORT);
        assert_eq!(
            parse_listen("localhost:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("localhost").unwrap().port(), DEFAULT_PORT);
        assert_eq!(parse_listen("::1:17601").unwrap().port(), 17601);
    }

    #[test]
    fn parse_listen_rejects_garbage() {
        assert!(parse_listen("example.com:80").is_err());
        assert!(parse_listen("localhost:http").is_err());
    }

    #[test]
    fn args_have_sane_defaults() {
        let args = Args::parse_from(["focus_core"]);
        assert_eq!(args.tick_ms, 1000);
        assert_eq!(args.tab_stale_seconds, 120);
        assert!(args.blocked_page.ends_with("blocked.html"));
    }
}
