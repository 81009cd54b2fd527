//! Markup response shaping.
//!
//! Injects the configured reload-client scripts into served HTML and
//! widens an existing Content-Security-Policy header so the injected
//! script and the live-reload endpoint are admitted.

use crate::config::{InjectedScript, ServerOptions};

/// Where to place an injected script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectPosition {
    Head,
    Body,
}

/// Inject a script tag into markup.
///
/// Prefers inserting just before the closing tag of the target section;
/// falls back to the opening `<head>` tag or the end of the document
/// when the markup is partial.
#[must_use]
pub fn inject_script(html: &str, script: &InjectedScript, position: InjectPosition) -> String {
    let tag = script_tag(script);

    let closing = match position {
        InjectPosition::Head => "</head>",
        InjectPosition::Body => "</body>",
    };
    if let Some(idx) = find_ci(html, closing) {
        let mut out = String::with_capacity(html.len() + tag.len());
        out.push_str(&html[..idx]);
        out.push_str(&tag);
        out.push_str(&html[idx..]);
        return out;
    }

    if position == InjectPosition::Head {
        if let Some(open) = find_ci(html, "<head") {
            if let Some(end) = html[open..].find('>') {
                let idx = open + end + 1;
                let mut out = String::with_capacity(html.len() + tag.len());
                out.push_str(&html[..idx]);
                out.push_str(&tag);
                out.push_str(&html[idx..]);
                return out;
            }
        }
    }

    let mut out = html.to_string();
    out.push_str(&tag);
    out
}

fn script_tag(script: &InjectedScript) -> String {
    match &script.url {
        Some(url) => format!("<script type=\"module\" src=\"{url}\"></script>"),
        None => format!("<script type=\"module\">{}</script>", script.source),
    }
}

/// Case-insensitive substring search.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_ascii_lowercase();
    haystack_lower.find(&needle.to_ascii_lowercase())
}

/// Widen an existing CSP header value to admit the injected scripts
/// (by URL and/or hash) and the live-reload endpoint.
///
/// Sources are appended to `script-src` / `connect-src`, falling back
/// to `default-src` when the specific directive is absent; a policy
/// with neither directive restricts nothing we care about and is left
/// alone.
#[must_use]
pub fn widen_csp(header: &str, options: &ServerOptions) -> String {
    let mut directives: Vec<(String, Vec<String>)> = header
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut tokens = part.split_whitespace();
            let name = tokens.next()?.to_string();
            let values = tokens.map(ToString::to_string).collect();
            Some((name, values))
        })
        .collect();

    let mut script_sources: Vec<String> = Vec::new();
    for script in [options.head_script.as_ref(), options.body_script.as_ref()]
        .into_iter()
        .flatten()
    {
        if let Some(url) = &script.url {
            script_sources.push(url.clone());
        }
        if let Some(hash) = &script.hash {
            script_sources.push(format!("'{hash}'"));
        }
    }
    if !script_sources.is_empty() {
        append_sources(&mut directives, "script-src", &script_sources);
    }

    if let Some(endpoint) = &options.reload_endpoint {
        append_sources(&mut directives, "connect-src", std::slice::from_ref(endpoint));
    }

    directives
        .iter()
        .map(|(name, values)| {
            if values.is_empty() {
                name.clone()
            } else {
                format!("{name} {}", values.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn append_sources(
    directives: &mut [(String, Vec<String>)],
    directive: &str,
    sources: &[String],
) {
    let target_idx = directives
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case(directive))
        .or_else(|| {
            directives
                .iter()
                .position(|(name, _)| name.eq_ignore_ascii_case("default-src"))
        });

    if let Some((_, values)) = target_idx.map(|idx| &mut directives[idx]) {
        for source in sources {
            if !values.iter().any(|v| v == source) {
                values.push(source.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(source: &str) -> InjectedScript {
        InjectedScript {
            source: source.to_string(),
            url: None,
            hash: None,
        }
    }

    #[test]
    fn test_inject_before_closing_head() {
        let html = "<html><head><title>x</title></head><body></body></html>";
        let out = inject_script(html, &script("reload()"), InjectPosition::Head);
        assert!(out.contains("reload()</script></head>"));
    }

    #[test]
    fn test_inject_body_and_src_tag() {
        let html = "<html><body><p>hi</p></body></html>";
        let with_url = InjectedScript {
            source: String::new(),
            url: Some("/__skiff/client.js".to_string()),
            hash: None,
        };
        let out = inject_script(html, &with_url, InjectPosition::Body);
        assert!(out.contains("<script type=\"module\" src=\"/__skiff/client.js\"></script></body>"));
    }

    #[test]
    fn test_inject_fallback_appends() {
        let html = "<p>fragment</p>";
        let out = inject_script(html, &script("x()"), InjectPosition::Body);
        assert!(out.ends_with("<script type=\"module\">x()</script>"));
    }

    #[test]
    fn test_inject_case_insensitive() {
        let html = "<HTML><HEAD></HEAD><BODY></BODY></HTML>";
        let out = inject_script(html, &script("x()"), InjectPosition::Head);
        assert!(out.contains("x()</script></HEAD>"));
    }

    #[test]
    fn test_widen_csp_script_src() {
        let mut options = ServerOptions::default();
        options.head_script = Some(InjectedScript {
            source: "reload()".to_string(),
            url: Some("/__skiff/client.js".to_string()),
            hash: Some("sha256-abc123".to_string()),
        });
        options.reload_endpoint = Some("/__skiff_reload".to_string());

        let out = widen_csp("default-src 'self'; script-src 'self'; connect-src 'self'", &options);
        assert!(out.contains("script-src 'self' /__skiff/client.js 'sha256-abc123'"));
        assert!(out.contains("connect-src 'self' /__skiff_reload"));
        assert!(out.starts_with("default-src 'self'"));
    }

    #[test]
    fn test_widen_csp_falls_back_to_default_src() {
        let mut options = ServerOptions::default();
        options.reload_endpoint = Some("/__skiff_reload".to_string());

        let out = widen_csp("default-src 'self'", &options);
        assert_eq!(out, "default-src 'self' /__skiff_reload");
    }

    #[test]
    fn test_widen_csp_no_duplicates() {
        let mut options = ServerOptions::default();
        options.reload_endpoint = Some("/__skiff_reload".to_string());

        let once = widen_csp("connect-src 'self' /__skiff_reload", &options);
        assert_eq!(once, "connect-src 'self' /__skiff_reload");
    }
}
