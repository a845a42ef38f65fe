//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the relay honest:
//! - No sleep calls in production code; waiting is done on channels
//! - No blocking I/O inside async code paths
//!
//! The helpers here locate the relay sources and split each file into its
//! production part and its `#[cfg(test)]` part.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees scanned by the enforcement tests
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src"];

/// A line of production code
#[derive(Debug)]
pub struct CodeLine {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// The line with any trailing `//` comment removed
    pub code: String,
    /// Whether the line sits inside a non-async function
    pub in_sync_fn: bool,
}

impl std::fmt::Display for CodeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file below `dir`
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Production lines of every file in [`PRODUCTION_DIRS`]
///
/// Everything from the first `#[cfg(test)]` onward is treated as test code.
pub fn production_lines() -> Vec<CodeLine> {
    let root = workspace_root();
    let mut out = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let mut in_sync_fn = false;

            for (idx, line) in content.lines().enumerate() {
                let trimmed = line.trim_start();
                if trimmed.starts_with("#[cfg(test)]") {
                    break;
                }
                if trimmed.starts_with("//") {
                    continue;
                }
                if is_fn_header(trimmed) {
                    in_sync_fn = !trimmed.contains("async fn");
                }

                out.push(CodeLine {
                    path: path.clone(),
                    number: idx + 1,
                    code: line.split("//").next().unwrap_or(line).to_string(),
                    in_sync_fn,
                });
            }
        }
    }
    out
}

fn is_fn_header(trimmed: &str) -> bool {
    let rest = trimmed
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub ");
    rest.starts_with("fn ") || rest.starts_with("async fn ")
}

/// Print violations and fail the calling test if there are any
pub fn report(kind: &str, violations: &[CodeLine], advice: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {kind} found in production code!\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in advice {
        eprintln!("  {line}");
    }

    panic!("\nFound {} {kind} violation(s).", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_sources_are_found() {
        let files = rust_files(&workspace_root().join("relay/core/src"));
        assert!(files.iter().any(|p| p.ends_with("relay.rs")));
        assert!(!production_lines().is_empty());
    }

    #[test]
    fn test_fn_header_detection() {
        assert!(is_fn_header("pub fn load() {"));
        assert!(is_fn_header("pub(crate) fn modify("));
        assert!(is_fn_header("pub async fn run("));
        assert!(!is_fn_header("let f = fn_ptr;"));
    }
}
