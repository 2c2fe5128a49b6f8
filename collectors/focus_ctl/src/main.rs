use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "focus_ctl", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17600
    #[arg(long, default_value = "http://127.0.0.1:17600")]
    core_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show tracking state and running activities.
    Status,
    /// Pause usage tracking (blocking keeps working).
    Pause {
        /// Resume automatically after this many minutes.
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Resume usage tracking.
    Resume,
    /// Start an activity template by id.
    Start { id: String },
    /// Stop a running activity without recording it.
    Stop { id: String },
    /// Complete a running activity and append it to the task history.
    Complete { id: String },
    /// Per-site usage for a day.
    Today {
        /// YYYY-MM-DD, defaults to the local date.
        #[arg(long)]
        date: Option<String>,
    },
    /// Show what the core would decide for a URL.
    Check { url: String },
    /// Report the active browser tab to the core.
    ReportTab {
        url: String,
        #[arg(long, default_value_t = 1)]
        tab_id: i64,
    },
    /// Poll for navigate commands and print them.
    Follow {
        /// Poll interval (milliseconds).
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
}

#[derive(Deserialize)]
struct OkResponse<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

async fn read_ok<T: DeserializeOwned>(res: reqwest::Response) -> anyhow::Result<Option<T>> {
    let status = res.status();
    let body: OkResponse<T> = res
        .json()
        .await
        .with_context(|| format!("http_{}: unreadable body", status.as_u16()))?;
    if !body.ok {
        anyhow::bail!(
            "http_{}: {}",
            status.as_u16(),
            body.error.unwrap_or_else(|| "not_ok".to_string())
        );
    }
    Ok(body.data)
}

async fn get_ok<T: DeserializeOwned>(client: &Client, url: &str) -> anyhow::Result<Option<T>> {
    read_ok(client.get(url).send().await?).await
}

async fn post_ok<T: DeserializeOwned, B: Serialize>(
    client: &Client,
    url: &str,
    body: &B,
) -> anyhow::Result<Option<T>> {
    read_ok(client.post(url).json(body).send().await?).await
}

#[derive(Deserialize)]
struct TrackingStatus {
    paused: bool,
    #[serde(default)]
    paused_until: Option<i64>,
}

#[derive(Deserialize)]
struct ActiveActivity {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "startTime")]
    start_time: i64,
    #[serde(rename = "endTime", default)]
    end_time: Option<i64>,
}

#[derive(Deserialize)]
struct SiteUsage {
    site: String,
    percent: f64,
    clock: String,
}

#[derive(Deserialize)]
struct DaySummary {
    date: String,
    total_seconds: i64,
    sites: Vec<SiteUsage>,
}

#[derive(Deserialize)]
struct NavigationCommand {
    #[serde(rename = "tabId")]
    tab_id: i64,
    url: String,
}

#[derive(Serialize)]
struct TabReport<'a> {
    #[serde(rename = "tabId")]
    tab_id: i64,
    url: &'a str,
}

#[derive(Serialize)]
struct PauseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    minutes: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "focus_ctl=info".into()),
        )
        .init();

    let args = Args::parse();
    let client = Client::new();
    let base = args.core_url.trim_end_matches('/');

    match args.command {
        Command::Status => {
            let tracking: Option<TrackingStatus> =
                get_ok(&client, &format!("{base}/tracking/status")).await?;
            let active: Vec<ActiveActivity> =
                get_ok(&client, &format!("{base}/activities/active"))
                    .await?
                    .unwrap_or_default();
            print_status(tracking, &active);
        }
        Command::Pause { minutes } => {
            let tracking: Option<TrackingStatus> = post_ok(
                &client,
                &format!("{base}/tracking/pause"),
                &PauseBody { minutes },
            )
            .await?;
            print_status(tracking, &[]);
        }
        Command::Resume => {
            let tracking: Option<TrackingStatus> =
                post_ok(&client, &format!("{base}/tracking/resume"), &Value::Null).await?;
            print_status(tracking, &[]);
        }
        Command::Start { id } => {
            let started: Option<ActiveActivity> =
                post_ok(&client, &format!("{base}/activities/{id}/start"), &Value::Null).await?;
            if let Some(a) = started {
                match a.end_time {
                    Some(end) => println!("started {} until {}", a.name, fmt_local(end)),
                    None => println!("started {} (no time limit)", a.name),
                }
            }
        }
        Command::Stop { id } => {
            let _: Option<Value> =
                post_ok(&client, &format!("{base}/activities/{id}/stop"), &Value::Null).await?;
            println!("stopped {id}");
        }
        Command::Complete { id } => {
            let entry: Option<Value> =
                post_ok(&client, &format!("{base}/activities/{id}/complete"), &Value::Null)
                    .await?;
            let name = entry
                .as_ref()
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(&id)
                .to_string();
            println!("completed {name}");
        }
        Command::Today { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            let summary: Option<DaySummary> =
                get_ok(&client, &format!("{base}/stats/day?date={date}")).await?;
            match summary {
                Some(s) if !s.sites.is_empty() => {
                    println!("{} total {}", s.date, format_duration(s.total_seconds));
                    for site in s.sites {
                        println!("{:>7.2}%  {}  {}", site.percent, site.clock, site.site);
                    }
                }
                _ => println!("No data recorded for {date}."),
            }
        }
        Command::Check { url } => {
            let res = client
                .get(format!("{base}/decision"))
                .query(&[("url", url.as_str())])
                .send()
                .await?;
            let preview: Option<Value> = read_ok(res).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Command::ReportTab { url, tab_id } => {
            let _: Option<Value> = post_ok(
                &client,
                &format!("{base}/tab"),
                &TabReport { tab_id, url: &url },
            )
            .await?;
            info!("reported tab {tab_id}: {url}");
        }
        Command::Follow { poll_ms } => follow(&client, base, poll_ms).await,
    }
    Ok(())
}

/// Polls the core for navigate commands until interrupted.
async fn follow(client: &Client, base: &str, poll_ms: u64) {
    let endpoint = format!("{base}/navigation");
    info!("following navigation commands from {endpoint}");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return;
            }
            _ = sleep(Duration::from_millis(poll_ms)) => {}
        }
        match get_ok::<NavigationCommand>(client, &endpoint).await {
            Ok(Some(cmd)) => info!("navigate tab {} -> {}", cmd.tab_id, cmd.url),
            Ok(None) => {}
            Err(e) => error!("poll failed: {e}"),
        }
    }
}

fn print_status(tracking: Option<TrackingStatus>, active: &[ActiveActivity]) {
    if let Some(t) = tracking {
        match (t.paused, t.paused_until) {
            (false, _) => println!("tracking: on"),
            (true, Some(until)) => println!("tracking: paused until {}", fmt_local(until)),
            (true, None) => println!("tracking: paused"),
        }
    }
    let now = chrono::Utc::now().timestamp_millis();
    for a in active {
        let detail = match a.end_time {
            Some(end) => format!("{} left", format_duration((end - now) / 1000)),
            None => format!("running {}", format_duration((now - a.start_time) / 1000)),
        };
        println!("  {} [{}] {}", a.name, a.id, detail);
    }
}

fn fmt_local(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "??:??".to_string())
}

fn format_duration(seconds: i64) -> String {
    let m = ((seconds + 30) / 60).max(0);
    if m < 60 {
        return format!("{m}m");
    }
    let h = m / 60;
    let rm = m % 60;
    if rm == 0 {
        format!("{h}h")
    } else {
        format!("{h}h {rm}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_rounds_to_minutes() {
        assert_eq!(format_duration(-5), "0m");
        assert_eq!(format_duration(29), "0m");
        assert_eq!(format_duration(90), "2m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3600 + 25 * 60), "1h 25m");
    }

    #[test]
    fn envelope_without_data_parses() {
        let body: OkResponse<NavigationCommand> = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(body.ok);
        assert!(body.data.is_none());

        let body: OkResponse<Value> =
            serde_json::from_str(r#"{"ok":false,"error":"already_active"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("already_active"));
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::parse_from(["focus_ctl", "pause", "--minutes", "15"]);
        assert!(matches!(args.command, Command::Pause { minutes: Some(15) }));
        let args = Args::parse_from(["focus_ctl", "report-tab", "https://a.com/", "--tab-id", "9"]);
        assert!(matches!(args.command, Command::ReportTab { tab_id: 9, .. }));
    }
}
