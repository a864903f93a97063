//! Validation of model-emitted routes against the known route set.
//!
//! Models regularly invent plausible paths (`/api/function-calling`,
//! `/docs/quickstart`). Resolution tries progressively looser matches and
//! gives up rather than sending the reader to a page that does not exist.

use std::collections::{BTreeMap, HashMap, HashSet};

use url::Url;

use crate::knowledge::RouteIndex;

/// Hallucinations seen often enough to map explicitly. Applied only when the
/// target exists in the index.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("/api/function_calling", "/capabilities/function_calling"),
    ("/function_calling", "/capabilities/function_calling"),
    ("/tools", "/capabilities/function_calling"),
    ("/api/vision", "/capabilities/vision"),
    ("/vision", "/capabilities/vision"),
    ("/quickstart", "/getting-started/quickstart"),
    ("/getting_started", "/getting-started/quickstart"),
    ("/api/embeddings", "/capabilities/embeddings"),
    ("/embeddings", "/capabilities/embeddings"),
    ("/fine_tuning", "/capabilities/finetuning"),
    ("/finetuning", "/capabilities/finetuning"),
    ("/home", "/"),
    ("/index", "/"),
    ("/docs", "/"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The route existed as written (after normalization).
    Exact,
    /// Rewritten to a different, known route.
    Corrected,
    /// Only the category was recognized; sent to its landing page.
    CategoryFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: String,
    pub kind: ResolutionKind,
}

impl Resolution {
    fn new(path: &str, kind: ResolutionKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
        }
    }
}

/// Case-insensitive key treating `-` and `_` as the same character.
fn loose_key(path: &str) -> String {
    path.to_lowercase().replace('-', "_")
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

fn first_segment(path: &str) -> Option<&str> {
    path.split('/').find(|s| !s.is_empty())
}

/// Reduce a model-written route or URL to a canonical `/a/b` path.
pub fn normalize_route(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let path = match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.path().to_string(),
        _ => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    if path.chars().any(char::is_whitespace) {
        return None;
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    Some(format!("/{}", segments.join("/")))
}

#[derive(Debug, Clone)]
pub struct RouteResolver {
    known: HashSet<String>,
    /// Loose key → canonical route.
    loose: HashMap<String, String>,
    /// Loose category slug → landing route.
    categories: HashMap<String, String>,
    /// Loose alias → target route.
    aliases: HashMap<String, String>,
}

impl RouteResolver {
    pub fn new<I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: Vec<String> = routes.into_iter().map(Into::into).collect();
        sorted.sort();
        sorted.dedup();

        let mut loose = HashMap::new();
        let mut by_category: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for route in &sorted {
            loose.entry(loose_key(route)).or_insert_with(|| route.clone());
            if let Some(slug) = first_segment(route) {
                by_category.entry(loose_key(slug)).or_default().push(route);
            }
        }

        let known: HashSet<String> = sorted.iter().cloned().collect();
        let categories = by_category
            .into_iter()
            .filter_map(|(slug, routes)| {
                let landing = routes
                    .iter()
                    .find(|r| r.split('/').filter(|s| !s.is_empty()).count() == 1)
                    .or_else(|| routes.first())?;
                Some((slug, landing.to_string()))
            })
            .collect();

        let mut resolver = Self {
            known,
            loose,
            categories,
            aliases: HashMap::new(),
        };
        for (from, to) in DEFAULT_ALIASES {
            resolver = resolver.with_alias(from, to);
        }
        resolver
    }

    pub fn from_index(index: &RouteIndex) -> Self {
        Self::new(index.all_routes.iter().cloned())
    }

    /// Register an alias. Ignored when `to` is not a known route.
    pub fn with_alias(mut self, from: &str, to: &str) -> Self {
        if let Some(from) = normalize_route(from)
            && self.known.contains(to)
        {
            self.aliases.insert(loose_key(&from), to.to_string());
        }
        self
    }

    pub fn is_known(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn resolve(&self, raw: &str) -> Option<Resolution> {
        let candidate = normalize_route(raw)?;
        let resolution = self.resolve_normalized(&candidate).or_else(|| {
            // `/docs/x` is a common invented prefix.
            let stripped = candidate.strip_prefix("/docs/")?;
            self.resolve_normalized(&format!("/{stripped}"))
                .map(|r| match r.kind {
                    ResolutionKind::Exact => Resolution::new(&r.path, ResolutionKind::Corrected),
                    _ => r,
                })
        });

        match &resolution {
            Some(r) if r.kind != ResolutionKind::Exact => {
                tracing::info!(from = raw, to = %r.path, kind = ?r.kind, "Corrected model route");
            }
            None => tracing::warn!(route = raw, "Dropping unknown model route"),
            _ => {}
        }
        resolution
    }

    fn resolve_normalized(&self, candidate: &str) -> Option<Resolution> {
        if self.known.contains(candidate) {
            return Some(Resolution::new(candidate, ResolutionKind::Exact));
        }

        let key = loose_key(candidate);
        if let Some(route) = self.loose.get(&key) {
            return Some(Resolution::new(route, ResolutionKind::Corrected));
        }

        if let Some(route) = self.aliases.get(&key) {
            return Some(Resolution::new(route, ResolutionKind::Corrected));
        }

        if candidate != "/" {
            let wanted = loose_key(last_segment(candidate));
            let best = self
                .known
                .iter()
                .filter(|r| r.as_str() != "/" && loose_key(last_segment(r)) == wanted)
                .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            if let Some(route) = best {
                return Some(Resolution::new(route, ResolutionKind::Corrected));
            }
        }

        let slug = first_segment(candidate)?;
        self.categories
            .get(&loose_key(slug))
            .map(|route| Resolution::new(route, ResolutionKind::CategoryFallback))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn resolver() -> RouteResolver {
        RouteResolver::new([
            "/",
            "/api",
            "/api/endpoint/chat",
            "/capabilities/vision",
            "/capabilities/function_calling",
            "/capabilities/completion/prompting_capabilities",
            "/getting-started/quickstart",
            "/getting-started/models/overview",
            "/cookbooks/mistral-ocr-document_understanding",
        ])
    }

    fn resolved(raw: &str) -> Option<(String, ResolutionKind)> {
        resolver().resolve(raw).map(|r| (r.path, r.kind))
    }

    #[test]
    fn normalize_handles_urls_queries_and_slashes() {
        assert_eq!(
            normalize_route("https://docs.mistral.ai/capabilities/vision/?x=1#top").as_deref(),
            Some("/capabilities/vision")
        );
        assert_eq!(normalize_route("capabilities//vision/").as_deref(), Some("/capabilities/vision"));
        assert_eq!(normalize_route("/").as_deref(), Some("/"));
        assert_eq!(normalize_route("/a b"), None);
        assert_eq!(normalize_route("  "), None);
    }

    #[test]
    fn exact_routes_resolve_unchanged() {
        assert_eq!(
            resolved("/capabilities/vision"),
            Some(("/capabilities/vision".to_string(), ResolutionKind::Exact))
        );
        assert_eq!(resolved("/"), Some(("/".to_string(), ResolutionKind::Exact)));
    }

    #[test]
    fn separator_and_case_differences_are_corrected() {
        assert_eq!(
            resolved("/Capabilities/Function-Calling"),
            Some((
                "/capabilities/function_calling".to_string(),
                ResolutionKind::Corrected
            ))
        );
        assert_eq!(
            resolved("/getting_started/quickstart"),
            Some(("/getting-started/quickstart".to_string(), ResolutionKind::Corrected))
        );
    }

    #[test]
    fn known_hallucinations_use_alias_table() {
        assert_eq!(
            resolved("/api/function-calling"),
            Some((
                "/capabilities/function_calling".to_string(),
                ResolutionKind::Corrected
            ))
        );
        assert_eq!(
            resolved("/home"),
            Some(("/".to_string(), ResolutionKind::Corrected))
        );
    }

    #[test]
    fn aliases_to_unknown_targets_are_ignored() {
        // `/capabilities/embeddings` is not in this index.
        assert_eq!(resolved("/embeddings"), None);
    }

    #[test]
    fn last_segment_match_prefers_shortest_route() {
        assert_eq!(
            resolved("/guides/prompting_capabilities"),
            Some((
                "/capabilities/completion/prompting_capabilities".to_string(),
                ResolutionKind::Corrected
            ))
        );
        assert_eq!(
            resolved("/models/overview"),
            Some((
                "/getting-started/models/overview".to_string(),
                ResolutionKind::Corrected
            ))
        );
    }

    #[test]
    fn unknown_page_in_known_category_falls_back_to_landing() {
        assert_eq!(
            resolved("/api/endpoint/batch"),
            Some(("/api".to_string(), ResolutionKind::CategoryFallback))
        );
        // No `/cookbooks` page: first route of the category.
        assert_eq!(
            resolved("/cookbooks/rag-pipeline"),
            Some((
                "/cookbooks/mistral-ocr-document_understanding".to_string(),
                ResolutionKind::CategoryFallback
            ))
        );
    }

    #[test]
    fn docs_prefix_is_stripped() {
        assert_eq!(
            resolved("/docs/capabilities/vision"),
            Some(("/capabilities/vision".to_string(), ResolutionKind::Corrected))
        );
    }

    #[test]
    fn completely_unknown_routes_are_dropped() {
        assert_eq!(resolved("/pricing/enterprise"), None);
        assert_eq!(resolved("not a route"), None);
    }

    #[test]
    fn custom_alias_can_be_added() {
        let resolver = resolver().with_alias("/ocr", "/cookbooks/mistral-ocr-document_understanding");
        assert_eq!(
            resolver.resolve("/ocr").map(|r| r.path),
            Some("/cookbooks/mistral-ocr-document_understanding".to_string())
        );
    }
}
