use crate::model::Category;

/// Normalizes a user-entered site (or a hostname) for comparison.
pub fn normalize_site(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let s = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    s.strip_suffix('/').unwrap_or(s).to_string()
}

/// Symmetric subdomain match: `reddit.com` matches `old.reddit.com` and the
/// other way around. `example.com` never matches `notexample.com`.
pub fn site_matches(item: &str, domain: &str) -> bool {
    let item = normalize_site(item);
    let domain = normalize_site(domain);
    if item.is_empty() || domain.is_empty() {
        return false;
    }
    domain == item
        || domain.ends_with(&format!(".{item}"))
        || item.ends_with(&format!(".{domain}"))
}

/// First category (in list order) with a matching item.
pub fn find_category<'a>(categories: &'a [Category], domain: &str) -> Option<&'a Category> {
    categories
        .iter()
        .find(|c| c.items.iter().any(|item| site_matches(item, domain)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: &str, items: &[&str]) -> Category {
        Category {
            id: id.to_string(),
            name: id.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
            ..Category::default()
        }
    }

    #[test]
    fn normalize_strips_scheme_and_trailing_slash() {
        assert_eq!(normalize_site("HTTPS://YouTube.com/"), "youtube.com");
        assert_eq!(normalize_site("http://example.com"), "example.com");
        assert_eq!(normalize_site("  reddit.com  "), "reddit.com");
        assert_eq!(normalize_site("example.com/path/"), "example.com/path");
    }

    #[test]
    fn subdomain_match_is_symmetric() {
        assert!(site_matches("old.reddit.com", "reddit.com"));
        assert!(site_matches("reddit.com", "old.reddit.com"));
        assert!(site_matches("https://reddit.com/", "reddit.com"));
        assert!(!site_matches("example.com", "notexample.com"));
        assert!(!site_matches("notexample.com", "example.com"));
    }

    #[test]
    fn empty_items_never_match() {
        assert!(!site_matches("", "example.com"));
        assert!(!site_matches("https://", "example.com"));
    }

    #[test]
    fn first_matching_category_wins() {
        let cats = vec![
            cat("work", &["github.com"]),
            cat("fun", &["youtube.com"]),
            cat("music", &["music.youtube.com"]),
        ];
        let id_of = |domain: &str| find_category(&cats, domain).map(|c| c.id.clone());
        assert_eq!(id_of("music.youtube.com").as_deref(), Some("fun"));
        assert_eq!(id_of("www.github.com").as_deref(), Some("work"));
        assert!(find_category(&cats, "docs.rs").is_none());
    }
}
