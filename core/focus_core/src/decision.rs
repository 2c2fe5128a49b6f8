use crate::model::{ActiveActivity, Category};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    /// The category itself is flagged `isBlocked`.
    ManualBlock,
    /// The last activity (in list order) that blocks the category without an
    /// exception for this URL.
    ActivityBlock {
        activity_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        redirect: Option<String>,
    },
}

impl Verdict {
    pub fn is_block(&self) -> bool {
        !matches!(self, Verdict::Allow)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub redirect_target: String,
}

impl Decision {
    pub fn is_block(&self) -> bool {
        self.verdict.is_block()
    }
}

pub fn blocked_page_for(blocked_page: &str, domain: &str) -> String {
    format!("{blocked_page}?site={domain}")
}

pub fn ensure_scheme(target: &str) -> String {
    if target.starts_with("http") {
        target.to_string()
    } else {
        format!("https://{target}")
    }
}

/// Combines the manual category flag and every active activity into one verdict.
/// Manual and activity blocks are OR-ed; an activity only contributes when the
/// URL hits none of its own exceptions. Without a category nothing is blocked.
pub fn decide(
    domain: &str,
    url: &str,
    category: Option<&Category>,
    activities: &[ActiveActivity],
    blocked_page: &str,
) -> Decision {
    let mut redirect_target = blocked_page_for(blocked_page, domain);

    let Some(category) = category else {
        return Decision {
            verdict: Verdict::Allow,
            redirect_target,
        };
    };

    let mut verdict = if category.is_blocked {
        Verdict::ManualBlock
    } else {
        Verdict::Allow
    };

    for act in activities {
        if !act.blocks_category(&category.id) || act.exception_matches(url) {
            continue;
        }
        let redirect = act.redirect_url().map(ensure_scheme);
        if let Some(r) = &redirect {
            redirect_target = r.clone();
        }
        verdict = Verdict::ActivityBlock {
            activity_id: act.id().to_string(),
            redirect,
        };
    }

    Decision {
        verdict,
        redirect_target,
    }
}

/// Where to send the tab, or `None` when the decision allows the page or the
/// tab is already at (or under) the target.
pub fn navigation_target<'a>(
    decision: &'a Decision,
    current_url: &str,
    blocked_page: &str,
) -> Option<&'a str> {
    if !decision.is_block() {
        return None;
    }
    let target = decision.redirect_target.as_str();
    if current_url.starts_with(target) {
        return None;
    }
    if target.starts_with(blocked_page) && current_url.starts_with(blocked_page) {
        return None;
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Activity;

    const BLOCKED: &str = "chrome-extension://focus-guard/blocked.html";

    fn category(id: &str, is_blocked: bool) -> Category {
        Category {
            id: id.to_string(),
            name: "Video".to_string(),
            items: vec!["youtube.com".to_string()],
            is_blocked,
            color: None,
        }
    }

    fn activity(id: &str, cats: &[&str], redirect: &str, exceptions: &[&str]) -> ActiveActivity {
        ActiveActivity {
            template: Activity {
                id: id.to_string(),
                name: id.to_string(),
                redirect_url: Some(redirect.to_string()),
                exceptions: exceptions.iter().map(|s| s.to_string()).collect(),
                blocked_category_ids: cats.iter().map(|s| s.to_string()).collect(),
                ..Activity::default()
            },
            start_time: 0,
            end_time: None,
        }
    }

    #[test]
    fn activity_blocks_to_internal_page() {
        let c = category("c1", false);
        let acts = vec![activity("a1", &["c1"], "", &[])];
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &acts, BLOCKED);
        assert!(d.is_block());
        assert_eq!(
            d.verdict,
            Verdict::ActivityBlock {
                activity_id: "a1".to_string(),
                redirect: None
            }
        );
        assert_eq!(
            d.redirect_target,
            "chrome-extension://focus-guard/blocked.html?site=youtube.com"
        );
    }

    #[test]
    fn activity_exception_lifts_its_block() {
        let c = category("c1", false);
        let acts = vec![activity("a1", &["c1"], "", &["youtube.com/watch?v=music"])];
        let url = "youtube.com/watch?v=music";
        let d = decide("youtube.com", url, Some(&c), &acts, BLOCKED);
        assert_eq!(d.verdict, Verdict::Allow);
        assert!(!d.is_block());
    }

    #[test]
    fn exception_does_not_lift_manual_block() {
        let c = category("c1", true);
        let acts = vec![activity("a1", &["c1"], "focus.example", &["/watch"])];
        let d = decide("youtube.com", "https://youtube.com/watch", Some(&c), &acts, BLOCKED);
        assert_eq!(d.verdict, Verdict::ManualBlock);
        assert!(d.redirect_target.starts_with(BLOCKED));
    }

    #[test]
    fn manual_block_needs_no_activity() {
        let c = category("c1", true);
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &[], BLOCKED);
        assert_eq!(d.verdict, Verdict::ManualBlock);
    }

    #[test]
    fn last_redirect_wins() {
        let c = category("c1", false);
        let acts = vec![
            activity("a", &["c1"], "a.com", &[]),
            activity("b", &["c1"], "b.com", &[]),
        ];
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &acts, BLOCKED);
        assert_eq!(d.redirect_target, "https://b.com");
    }

    #[test]
    fn later_activity_without_redirect_keeps_earlier_target() {
        let c = category("c1", false);
        let acts = vec![
            activity("a", &["c1"], "http://a.com/focus", &[]),
            activity("b", &["c1"], "", &[]),
        ];
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &acts, BLOCKED);
        assert_eq!(d.redirect_target, "http://a.com/focus");
        assert_eq!(
            d.verdict,
            Verdict::ActivityBlock {
                activity_id: "b".to_string(),
                redirect: None
            }
        );
    }

    #[test]
    fn no_category_means_allow() {
        let acts = vec![activity("a", &["c1"], "a.com", &[])];
        let d = decide("docs.rs", "https://docs.rs/", None, &acts, BLOCKED);
        assert_eq!(d.verdict, Verdict::Allow);
    }

    #[test]
    fn activity_for_other_category_is_ignored() {
        let c = category("c1", false);
        let acts = vec![activity("a", &["c2"], "a.com", &[])];
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &acts, BLOCKED);
        assert_eq!(d.verdict, Verdict::Allow);
    }

    #[test]
    fn loop_guard_skips_navigation_when_already_there() {
        let c = category("c1", false);
        let acts = vec![activity("a", &["c1"], "https://focus.example.com", &[])];
        let d = decide(
            "focus.example.com",
            "https://focus.example.com/today",
            Some(&c),
            &acts,
            BLOCKED,
        );
        assert!(d.is_block());
        assert_eq!(navigation_target(&d, "https://focus.example.com/today", BLOCKED), None);
        assert_eq!(
            navigation_target(&d, "https://youtube.com/", BLOCKED),
            Some("https://focus.example.com")
        );
    }

    #[test]
    fn loop_guard_covers_internal_page() {
        let c = category("c1", true);
        let d = decide("youtube.com", "https://youtube.com/", Some(&c), &[], BLOCKED);
        let current = format!("{BLOCKED}?site=old.youtube.com");
        assert_eq!(navigation_target(&d, &current, BLOCKED), None);
    }

    #[test]
    fn allow_never_navigates() {
        let d = decide("docs.rs", "https://docs.rs/", None, &[], BLOCKED);
        assert_eq!(navigation_target(&d, "https://docs.rs/", BLOCKED), None);
    }

    #[test]
    fn scheme_is_added_when_missing() {
        assert_eq!(ensure_scheme("b.com"), "https://b.com");
        assert_eq!(ensure_scheme("http://b.com"), "http://b.com");
        assert_eq!(ensure_scheme("https://b.com/x"), "https://b.com/x");
    }
}
