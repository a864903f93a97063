//! Out-of-band control directives embedded in model replies.
//!
//! The model ends a reply with lines such as `NAVIGATE: /capabilities/vision`.
//! They are stripped from the text shown to the reader and returned as
//! structured signals. A directive keyword must open its line, after at most
//! a list marker or emphasis, and is matched in upper case only, so prose like
//! "to navigate: open the sidebar" is left alone. Lines inside fenced code
//! blocks are never treated as directives.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::parse_bool;
use crate::lechat::preferences::PreferencePatch;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:[-*+>]|\d+\.)\s+)?[*_`]*(NAVIGATE|SET_CONTEXT|SET_PREFERENCE)[*_`]*\s*:[*_`]*",
    )
        .expect("valid regex")
});

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(\s*([^)\s]+)\s*\)").expect("valid regex"));

static EXCESS_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Navigate,
    SetContext,
    SetPreference,
}

impl DirectiveKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "NAVIGATE" => Some(Self::Navigate),
            "SET_CONTEXT" => Some(Self::SetContext),
            "SET_PREFERENCE" => Some(Self::SetPreference),
            _ => None,
        }
    }
}

/// A model reply split into display text and control signals.
///
/// Routes are returned as written by the model; validation happens in
/// [`crate::lechat::resolve::RouteResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub content: String,
    pub navigate: Option<String>,
    pub set_context: Option<String>,
    pub set_preference: Option<PreferencePatch>,
}

/// Split directives out of `raw`. The first directive of each kind wins.
pub fn parse_directives(raw: &str) -> ParsedReply {
    let mut parsed = ParsedReply::default();
    let mut kept: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            kept.push(line);
            continue;
        }
        if in_fence {
            kept.push(line);
            continue;
        }

        let Some(caps) = DIRECTIVE.captures(line) else {
            kept.push(line);
            continue;
        };
        let (Some(whole), Some(keyword)) = (caps.get(0), caps.get(1)) else {
            kept.push(line);
            continue;
        };

        let value = line[whole.end()..].trim();
        match DirectiveKind::from_keyword(keyword.as_str()) {
            Some(kind @ (DirectiveKind::Navigate | DirectiveKind::SetContext)) => {
                let Some((route, rest)) = split_route_value(value) else {
                    continue;
                };
                if !rest.is_empty() {
                    kept.push(rest);
                }
                let slot = match kind {
                    DirectiveKind::Navigate => &mut parsed.navigate,
                    _ => &mut parsed.set_context,
                };
                if slot.is_none() {
                    *slot = Some(route);
                }
            }
            Some(DirectiveKind::SetPreference) => {
                if parsed.set_preference.is_none() {
                    parsed.set_preference = parse_preference(value);
                }
            }
            None => {}
        }
    }

    let joined = kept.join("\n");
    parsed.content = EXCESS_BLANK_LINES
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string();
    parsed
}

/// Split a directive value into its route and any prose written after it.
fn split_route_value(value: &str) -> Option<(String, &str)> {
    let (token, rest) = match MARKDOWN_LINK.find(value) {
        Some(link) if value[..link.start()].trim().is_empty() => {
            (link.as_str(), &value[link.end()..])
        }
        _ => value
            .split_once(char::is_whitespace)
            .unwrap_or((value, "")),
    };
    let route = extract_route_token(token)?;
    let rest = rest
        .trim_start_matches(['`', '*', '"', '\'', '>', ')', '.', ',', ';'])
        .trim();
    Some((route, rest))
}

/// Pull a route out of a directive value: a bare path, a URL, or a Markdown link.
pub fn extract_route_token(value: &str) -> Option<String> {
    let token = match MARKDOWN_LINK.captures(value).and_then(|c| c.get(1)) {
        Some(target) => target.as_str(),
        None => value.split_whitespace().next()?,
    };

    let token = token
        .trim_start_matches(['"', '\'', '`', '<', '(', '*'])
        .trim_end_matches(['"', '\'', '`', '>', ')', '*', '.', ',', ';', ':', '!', '?']);

    if token.starts_with('/') || token.starts_with("http://") || token.starts_with("https://") {
        Some(token.to_string())
    } else {
        tracing::debug!(value, "Ignoring directive without a route");
        None
    }
}

/// Accepts `alwaysNavigate=true`, `always_navigate: yes`, or `{"alwaysNavigate": true}`.
pub fn parse_preference(value: &str) -> Option<PreferencePatch> {
    let value = value.trim().trim_matches(['`', '*']).trim();
    let mut patch = PreferencePatch::default();

    if value.starts_with('{') {
        let Ok(map) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(value)
        else {
            tracing::debug!(value, "Malformed SET_PREFERENCE JSON");
            return None;
        };
        for (key, raw) in map {
            let parsed = match raw {
                serde_json::Value::Bool(b) => Some(b),
                serde_json::Value::String(s) => parse_bool(&s),
                _ => None,
            };
            if let Some(flag) = parsed {
                apply_preference(&mut patch, &key, flag);
            }
        }
    } else {
        for pair in value.split([',', ';']) {
            let pair = pair.trim();
            let Some((key, raw)) = pair
                .split_once('=')
                .or_else(|| pair.split_once(':'))
                .or_else(|| pair.split_once(' '))
            else {
                continue;
            };
            if let Some(flag) = parse_bool(raw.trim().trim_matches(['"', '\''])) {
                apply_preference(&mut patch, key.trim().trim_matches(['"', '\'']), flag);
            }
        }
    }

    (!patch.is_empty()).then_some(patch)
}

fn apply_preference(patch: &mut PreferencePatch, key: &str, value: bool) {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "alwaysnavigate" | "autonavigate" => patch.always_navigate = Some(value),
        other => tracing::debug!(key = other, "Ignoring unknown preference"),
    }
}
