use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::knowledge::scan::{capitalize_words, scan_directory};

pub const DEFAULT_INIT_MESSAGE: &str =
    "I'm ready to help you with the documentation. Ask me anything!";

/// A single documentation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl RouteInfo {
    pub fn new(path: impl Into<String>, title: Option<&str>) -> Self {
        Self {
            path: path.into(),
            title: title.map(str::to_string),
        }
    }

    /// The first path segment, if any. `/` has none.
    pub fn category_slug(&self) -> Option<&str> {
        self.path.split('/').find(|s| !s.is_empty())
    }

    fn last_segment(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Routes sharing a first path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCategory {
    pub name: String,
    pub routes: Vec<RouteInfo>,
}

/// A directory to scan and the route prefix its pages live under.
#[derive(Debug, Clone)]
pub struct ScanSource {
    pub dir: PathBuf,
    pub base_route: String,
}

impl ScanSource {
    pub fn new(dir: impl Into<PathBuf>, base_route: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_route: base_route.into(),
        }
    }
}

/// Generated route knowledge for the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteIndex {
    pub generated_at: DateTime<Utc>,
    pub categories: Vec<RouteCategory>,
    pub init_message: String,
    pub route_knowledge: String,
    pub all_routes: Vec<String>,
}

/// Group routes by first path segment, sorted by category name then path.
pub fn categorize(routes: &[RouteInfo]) -> Vec<RouteCategory> {
    let mut grouped: BTreeMap<&str, Vec<RouteInfo>> = BTreeMap::new();
    for route in routes {
        if let Some(slug) = route.category_slug() {
            grouped.entry(slug).or_default().push(route.clone());
        }
    }

    let mut categories: Vec<RouteCategory> = grouped
        .into_iter()
        .map(|(slug, mut routes)| {
            routes.sort_by(|a, b| a.path.cmp(&b.path));
            RouteCategory {
                name: category_name(slug),
                routes,
            }
        })
        .collect();
    categories.sort_by(|a, b| a.name.cmp(&b.name));
    categories
}

/// `getting-started` → `Getting Started`.
pub fn category_name(slug: &str) -> String {
    capitalize_words(&slug.replace('-', " "))
}

/// Render the route listing injected into system prompts.
pub fn route_knowledge(categories: &[RouteCategory]) -> String {
    let lines = categories
        .iter()
        .map(|category| {
            let entries = category
                .routes
                .iter()
                .map(|route| match route.title.as_deref() {
                    Some(title) if title != route.last_segment().replace('_', " ") => {
                        format!("\"{}\" ({})", title, route.path)
                    }
                    _ => route.path.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}: {}", category.name, entries)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "**Available Documentation Routes:**\n{lines}\n\n\
         Match user requests to routes using either the page title or the URL path. \
         Only ever reference routes from this list."
    )
}

impl RouteIndex {
    /// Scan every source, append `extra_routes`, and render the knowledge text.
    ///
    /// Extra routes cover pages the scan cannot see, such as dynamic slugs.
    /// A scanned page wins over an extra route with the same path.
    pub fn build(sources: &[ScanSource], extra_routes: Vec<RouteInfo>) -> Self {
        let mut routes = Vec::new();
        for source in sources {
            let found = scan_directory(&source.dir, &source.base_route);
            tracing::info!(
                dir = %source.dir.display(),
                base_route = %source.base_route,
                count = found.len(),
                "Scanned documentation source"
            );
            routes.extend(found);
        }
        Self::from_routes(routes, extra_routes)
    }

    pub fn from_routes(mut routes: Vec<RouteInfo>, extra_routes: Vec<RouteInfo>) -> Self {
        let mut seen: HashSet<String> = routes.iter().map(|r| r.path.clone()).collect();
        for extra in extra_routes {
            if seen.insert(extra.path.clone()) {
                routes.push(extra);
            } else {
                tracing::debug!(path = %extra.path, "Extra route already scanned");
            }
        }

        let categories = categorize(&routes);
        let mut all_routes: Vec<String> = routes.into_iter().map(|r| r.path).collect();
        all_routes.sort();
        all_routes.dedup();

        Self {
            generated_at: Utc::now(),
            route_knowledge: route_knowledge(&categories),
            init_message: DEFAULT_INIT_MESSAGE.to_string(),
            categories,
            all_routes,
        }
    }

    /// An index with no routes. The assistant still answers, but cannot navigate.
    pub fn empty() -> Self {
        Self::from_routes(Vec::new(), Vec::new())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path).map_err(|source| IndexError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| IndexError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| IndexError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn known_routes(&self) -> HashSet<String> {
        self.all_routes.iter().cloned().collect()
    }

    pub fn title_for(&self, path: &str) -> Option<&str> {
        self.categories
            .iter()
            .flat_map(|c| c.routes.iter())
            .find(|r| r.path == path)
            .and_then(|r| r.title.as_deref())
    }

    pub fn route_count(&self) -> usize {
        self.all_routes.len()
    }
}
