use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActiveTab {
    #[serde(rename = "tabId")]
    pub tab_id: i64,
    pub url: String,
    #[serde(rename = "windowId", default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NavigationCommand {
    #[serde(rename = "tabId")]
    pub tab_id: i64,
    pub url: String,
    pub issued_at_ms: i64,
}

/// What the ticker needs from the browser.
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn active_tab(&self) -> Option<ActiveTab>;
    async fn navigate(&self, command: NavigationCommand);
}

struct Reported {
    tab: ActiveTab,
    at: Instant,
}

/// In-process tab host fed by the browser over HTTP: the extension reports the
/// focused tab and polls for the pending navigate command.
pub struct TabBridge {
    stale_after: Duration,
    latest: Mutex<Option<Reported>>,
    pending: Mutex<Option<NavigationCommand>>,
}

impl TabBridge {
    pub fn new(stale_after: Duration) -> Self {
        TabBridge {
            stale_after,
            latest: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    pub async fn report(&self, tab: ActiveTab) {
        let mut latest = self.latest.lock().await;
        *latest = Some(Reported {
            tab,
            at: Instant::now(),
        });
    }

    /// Takes the pending command, leaving the slot empty.
    pub async fn take_navigation(&self) -> Option<NavigationCommand> {
        self.pending.lock().await.take()
    }
}

#[async_trait]
impl TabHost for TabBridge {
    async fn active_tab(&self) -> Option<ActiveTab> {
        let latest = self.latest.lock().await;
        latest
            .as_ref()
            .filter(|r| r.at.elapsed() <= self.stale_after)
            .map(|r| r.tab.clone())
    }

    async fn navigate(&self, command: NavigationCommand) {
        let mut pending = self.pending.lock().await;
        *pending = Some(command);
    }
}
