use url::Url;

/// Hostname of an http(s) URL. Anything else (internal browser pages, files,
/// garbage input) has no domain and makes the tick a no-op.
pub fn resolve_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    let host = url.host_str()?.trim();
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}
