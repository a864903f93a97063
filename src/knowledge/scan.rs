//! Documentation tree scanning.
//!
//! A directory is a documentation route when it holds a `page.mdx`,
//! `page.tsx` or `page.js`. Directories named `_private`, `(group)` or
//! `.hidden` are skipped together with everything beneath them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::knowledge::RouteInfo;

/// Page file names in order of preference.
const PAGE_FILES: &[&str] = &["page.mdx", "page.tsx", "page.js"];

static TITLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^title:\s*(.+)$").expect("valid regex"));

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('_') || name.starts_with('(') || name.starts_with('.'))
}

fn page_rank(name: &str) -> Option<usize> {
    PAGE_FILES.iter().position(|p| *p == name)
}

/// Join a relative directory onto `base_route`, yielding `/` for the bare root.
fn route_for(base_route: &str, relative: &Path) -> String {
    let mut route = base_route.trim_end_matches('/').to_string();
    for component in relative.components() {
        if let Some(segment) = component.as_os_str().to_str() {
            route.push('/');
            route.push_str(segment);
        }
    }
    if route.is_empty() { "/".to_string() } else { route }
}

/// Scan `dir` and return every page route found, rooted at `base_route`.
///
/// Unreadable entries are logged and skipped; a missing root yields no routes.
pub fn scan_directory(dir: &Path, base_route: &str) -> Vec<RouteInfo> {
    let mut pages: BTreeMap<PathBuf, (usize, PathBuf)> = BTreeMap::new();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Error scanning documentation tree {}: {}", dir.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rank) = entry.file_name().to_str().and_then(page_rank) else {
            continue;
        };
        let Some(parent) = entry.path().parent() else {
            continue;
        };
        let relative = parent.strip_prefix(dir).unwrap_or(Path::new("")).to_path_buf();
        let candidate = (rank, entry.path().to_path_buf());
        pages
            .entry(relative)
            .and_modify(|current| {
                if rank < current.0 {
                    *current = candidate.clone();
                }
            })
            .or_insert(candidate);
    }

    pages
        .into_iter()
        .map(|(relative, (_, page_file))| {
            let path = route_for(base_route, &relative);
            let title = if page_file.extension().is_some_and(|ext| ext == "mdx") {
                extract_mdx_title(&page_file)
            } else {
                Some(title_from_route(&path, base_route))
            };
            RouteInfo { path, title }
        })
        .collect()
}

/// Title from an MDX file's front matter, falling back to the first `title:` line.
pub fn extract_mdx_title(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::debug!("Could not read {}: {}", path.display(), err);
            return None;
        }
    };
    title_from_mdx(&content)
}

pub(crate) fn title_from_mdx(content: &str) -> Option<String> {
    if let Some(front_matter) = front_matter(content)
        && let Ok(value) = serde_yml::from_str::<serde_yml::Value>(front_matter)
        && let Some(title) = value.get("title").and_then(|t| t.as_str())
    {
        let title = title.trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }

    TITLE_LINE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| strip_quotes(m.as_str().trim()).to_string())
        .filter(|t| !t.is_empty())
}

fn front_matter(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Title for code pages: the last route segment, `_` as spaces, words capitalized.
fn title_from_route(path: &str, base_route: &str) -> String {
    if path == "/" && base_route.trim_matches('/').is_empty() {
        return "Home".to_string();
    }
    let segment = path.rsplit('/').next().unwrap_or_default().replace('_', " ");
    capitalize_words(&segment)
}

pub(crate) fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scan_finds_pages_and_skips_private_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "page.tsx", "export default function Home() {}");
        write(
            root,
            "capabilities/completion/prompting_capabilities/page.mdx",
            "---\ntitle: Prompting\n---\n# Prompting",
        );
        write(root, "capabilities/vision/page.mdx", "---\ntitle: \"Vision\"\n---\n");
        write(root, "_components/widget/page.tsx", "");
        write(root, "(marketing)/landing/page.tsx", "");
        write(root, ".cache/page.mdx", "---\ntitle: Hidden\n---\n");
        write(root, "getting-started/notes.md", "not a page");

        let routes = scan_directory(root, "");

        assert_eq!(
            routes,
            vec![
                RouteInfo {
                    path: "/".to_string(),
                    title: Some("Home".to_string())
                },
                RouteInfo {
                    path: "/capabilities/completion/prompting_capabilities".to_string(),
                    title: Some("Prompting".to_string())
                },
                RouteInfo {
                    path: "/capabilities/vision".to_string(),
                    title: Some("Vision".to_string())
                },
            ]
        );
    }

    #[test]
    fn scan_prefixes_base_route_and_titles_code_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "page.tsx", "");
        write(root, "endpoint/chat_completions/page.js", "");

        let routes = scan_directory(root, "/api");
        let paths: Vec<_> = routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/api", "/api/endpoint/chat_completions"]);
        assert_eq!(routes[0].title.as_deref(), Some("Api"));
        assert_eq!(routes[1].title.as_deref(), Some("Chat Completions"));
    }

    #[test]
    fn scan_prefers_mdx_when_several_page_files_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "guides/page.tsx", "");
        write(root, "guides/page.mdx", "---\ntitle: All Guides\n---\n");

        let routes = scan_directory(root, "");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].title.as_deref(), Some("All Guides"));
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan_directory(&tmp.path().join("nope"), "").is_empty());
    }

    #[test]
    fn mdx_title_falls_back_to_title_line() {
        let content = "import X from 'y'\n\ntitle: 'Batch Inference'\n";
        assert_eq!(title_from_mdx(content).as_deref(), Some("Batch Inference"));
    }

    #[test]
    fn mdx_without_title_has_none() {
        assert_eq!(title_from_mdx("---\nsidebar: 2\n---\n# Body"), None);
    }

    #[test]
    fn capitalize_words_handles_unicode_and_spacing() {
        assert_eq!(capitalize_words("function  calling"), "Function Calling");
        assert_eq!(capitalize_words("équipe ocr"), "Équipe Ocr");
    }
}
