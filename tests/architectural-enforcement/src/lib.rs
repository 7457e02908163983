//! Architectural Enforcement Integration Tests
//!
//! Shared scanning helpers for the policy tests in `tests/`:
//! - No blocking sleeps in production code
//! - No blocking network I/O in production code
//!
//! Production code is every line of a `.rs` file under the relay crates'
//! `src/` directories up to the first `#[cfg(test)]`, with `//` comments
//! stripped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories holding production code, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/watch/src"];

/// A policy violation at one source line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// All `.rs` files below `dir`
#[must_use]
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of a source file as `(line_number, code)` pairs
///
/// Stops at the first `#[cfg(test)]`; comments are removed.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Scan every production directory, reporting lines `is_violation` flags
///
/// `is_violation` receives the file path, all production lines of the file
/// and the index of the line under test.
pub fn scan<F>(is_violation: F) -> Vec<Violation>
where
    F: Fn(&Path, &[(usize, &str)], usize) -> bool,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_sources(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let lines = production_lines(&content);

            for (idx, (line_number, code)) in lines.iter().enumerate() {
                if is_violation(&path, &lines, idx) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: *line_number,
                        text: code.trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

/// Check if any line within `before` lines above (and 5 below) mentions one
/// of `words`
#[must_use]
pub fn context_mentions(lines: &[(usize, &str)], idx: usize, before: usize, words: &[&str]) -> bool {
    let range = idx.saturating_sub(before)..std::cmp::min(idx + 5, lines.len());
    lines[range].iter().any(|(_, code)| {
        let code = code.to_lowercase();
        words.iter().any(|w| code.contains(w))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let source = "fn a() {}\n// note\nlet x = 1; // trailing\n#[cfg(test)]\nfn b() {}\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "let x = 1; ")]);
    }

    #[test]
    fn test_context_mentions() {
        let lines = vec![(1, "let delay = backoff_delay(attempt);"), (2, "sleep(delay)")];
        assert!(context_mentions(&lines, 1, 5, &["backoff"]));
        assert!(!context_mentions(&lines, 1, 5, &["frame"]));
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(workspace_root().join(dir).is_dir(), "missing {dir}");
        }
    }
}
