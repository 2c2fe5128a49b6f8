use crate::activity::prune_expired;
use crate::category::find_category;
use crate::decision::{decide, navigation_target, Decision};
use crate::domain::resolve_domain;
use crate::model::ActiveActivity;
use crate::store::{RecordSnapshot, Store};
use crate::tabs::{ActiveTab, NavigationCommand, TabHost};
use crate::usage::count_suppressed;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Local calendar day, `YYYY-MM-DD`.
pub fn local_today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

pub struct TickInput<'a> {
    pub tab: Option<&'a ActiveTab>,
    pub records: RecordSnapshot,
    pub now_ms: i64,
    pub blocked_page: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    NoTab,
    NoDomain,
    /// Nothing counted (paused or excepted) and nothing blocked.
    Suppressed,
    Counted,
    Blocked { counted: bool },
    /// Blocked, but the tab already sits at the target.
    LoopGuarded { counted: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TickPlan {
    pub domain: Option<String>,
    /// Present only when pruning removed something.
    pub pruned_activities: Option<Vec<ActiveActivity>>,
    pub expired_ids: Vec<String>,
    /// A timed pause ran out and the pause records should be cleared.
    pub resume_tracking: bool,
    /// One second goes to `domain` for the local day.
    pub count: bool,
    pub decision: Option<Decision>,
    pub navigate: Option<NavigationCommand>,
    pub outcome: TickOutcome,
}

impl TickPlan {
    fn idle(outcome: TickOutcome) -> Self {
        TickPlan {
            domain: None,
            pruned_activities: None,
            expired_ids: Vec::new(),
            resume_tracking: false,
            count: false,
            decision: None,
            navigate: None,
            outcome,
        }
    }
}

/// One tick, no I/O: resolve → prune → count → match category → decide → guard.
pub fn evaluate_tick(input: TickInput<'_>) -> TickPlan {
    let Some(tab) = input.tab else {
        return TickPlan::idle(TickOutcome::NoTab);
    };
    let Some(domain) = resolve_domain(&tab.url) else {
        return TickPlan::idle(TickOutcome::NoDomain);
    };
    let RecordSnapshot {
        categories,
        active,
        tracking,
    } = input.records;

    let pruned = prune_expired(active, input.now_ms);
    let expired_ids: Vec<String> = pruned.expired.iter().map(|a| a.id().to_string()).collect();
    let pruned_activities = pruned.changed().then(|| pruned.active.clone());
    let active = pruned.active;

    let pause_expired =
        tracking.paused && tracking.paused_until.is_some_and(|u| u <= input.now_ms);
    let paused = tracking.paused && !pause_expired;

    let counted = !count_suppressed(&tab.url, &active, paused);

    let category = find_category(&categories, &domain);
    let decision = decide(&domain, &tab.url, category, &active, input.blocked_page);

    let navigate = navigation_target(&decision, &tab.url, input.blocked_page).map(|url| {
        NavigationCommand {
            tab_id: tab.tab_id,
            url: url.to_string(),
            issued_at_ms: input.now_ms,
        }
    });

    let outcome = match (decision.is_block(), navigate.is_some()) {
        (true, true) => TickOutcome::Blocked { counted },
        (true, false) => TickOutcome::LoopGuarded { counted },
        (false, _) if counted => TickOutcome::Counted,
        (false, _) => TickOutcome::Suppressed,
    };

    TickPlan {
        domain: Some(domain),
        pruned_activities,
        expired_ids,
        resume_tracking: pause_expired,
        count: counted,
        decision: Some(decision),
        navigate,
        outcome,
    }
}

/// State carried from one tick to the next. Owned by the ticker.
#[derive(Debug, Default)]
pub struct SessionState {
    pub last_domain: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TickerConfig {
    pub period: Duration,
    pub blocked_page: String,
}

pub struct Ticker<H: TabHost> {
    store: Store,
    tabs: Arc<H>,
    config: Arc<TickerConfig>,
    session: Arc<Mutex<SessionState>>,
}

impl<H: TabHost> Clone for Ticker<H> {
    fn clone(&self) -> Self {
        Ticker {
            store: self.store.clone(),
            tabs: self.tabs.clone(),
            config: self.config.clone(),
            session: self.session.clone(),
        }
    }
}

impl<H: TabHost + 'static> Ticker<H> {
    pub fn new(store: Store, tabs: Arc<H>, config: TickerConfig) -> Self {
        Ticker {
            store,
            tabs,
            config: Arc::new(config),
            session: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Fires one tick per period. Each tick runs as its own task, so a tick
    /// still waiting on storage can overlap the next one; under slow storage
    /// this may count a second twice. Drift is not compensated.
    pub async fn run(self) {
        info!("ticker started ({}ms period)", self.config.period.as_millis());
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let ticker = self.clone();
            tokio::spawn(async move {
                ticker.tick_once().await;
            });
        }
    }

    /// Runs one tick to completion. Returns `None` when the tick was dropped
    /// because storage failed.
    pub async fn tick_once(&self) -> Option<TickOutcome> {
        let tab = self.tabs.active_tab().await;
        if tab.as_ref().and_then(|t| resolve_domain(&t.url)).is_none() {
            self.observe_domain(None).await;
            return Some(if tab.is_none() {
                TickOutcome::NoTab
            } else {
                TickOutcome::NoDomain
            });
        }

        let records = match self.store.snapshot().await {
            Ok(v) => v,
            Err(err) => {
                error!("tick dropped, record read failed: {err}");
                return None;
            }
        };

        let now = now_ms();
        let today = local_today();
        let plan = evaluate_tick(TickInput {
            tab: tab.as_ref(),
            records,
            now_ms: now,
            blocked_page: &self.config.blocked_page,
        });
        self.observe_domain(plan.domain.clone()).await;
        self.apply(plan, now, &today).await
    }

    async fn observe_domain(&self, domain: Option<String>) {
        let mut session = self.session.lock().await;
        if session.last_domain != domain {
            match domain.as_deref() {
                Some(d) => info!("active domain: {d}"),
                None => debug!("active domain: none"),
            }
            session.last_domain = domain;
        }
    }

    /// Writes the plan, then navigates. Nothing is navigated if the write fails.
    async fn apply(&self, plan: TickPlan, now: i64, today: &str) -> Option<TickOutcome> {
        if plan.pruned_activities.is_some() || plan.count {
            let count = plan
                .domain
                .as_deref()
                .filter(|_| plan.count)
                .map(|site| (today, site));
            match self.store.commit_tick(now, count).await {
                Ok(commit) => {
                    for id in &commit.expired_ids {
                        info!("activity {id} expired");
                    }
                    if let (Some(total), Some((_, site))) = (commit.seconds_today, count) {
                        debug!("{site}: {total}s on {today}");
                    }
                }
                Err(err) => {
                    error!("tick dropped, saving tick state failed: {err}");
                    return None;
                }
            }
        }

        if plan.resume_tracking {
            match self.store.resume_tracking().await {
                Ok(()) => info!("timed tracking pause ended"),
                Err(err) => error!("clearing tracking pause failed: {err}"),
            }
        }

        if let Some(cmd) = plan.navigate {
            info!("redirecting tab {} to {}", cmd.tab_id, cmd.url);
            self.tabs.navigate(cmd).await;
        }

        Some(plan.outcome)
    }
}
