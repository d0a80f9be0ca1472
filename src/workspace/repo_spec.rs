//! Repository spec parsing
//!
//! Accepted forms:
//! - `github.com/org/repo` (https is assumed)
//! - `github.com/org/repo@v1.2`
//! - `https://github.com/org/repo@main`
//! - `git@github.com:org/repo@feature/x`
//! - `./local-path`, `../x`, `~/path`, `/abs/path` (no ref)
//!
//! Parsing never fails. Garbage in yields the whole string as URL with an
//! empty ref; clone reports the problem later.

use std::path::{Path, PathBuf};

/// Parsed repository reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub url: String,
    /// Empty = default branch
    pub reference: String,
}

impl RepoSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if is_local(spec) {
            return Self {
                url: spec.to_string(),
                reference: String::new(),
            };
        }

        let authority_end = authority_end(spec);
        let (head, rest) = spec.split_at(authority_end);

        let (url_rest, reference) = match last_unescaped_at(rest) {
            Some(idx) => (&rest[..idx], rest[idx + 1..].to_string()),
            None => (rest, String::new()),
        };

        let mut url = format!("{}{}", head, url_rest.replace("\\@", "@"));
        if needs_scheme(&url) {
            url = format!("https://{}", url);
        }

        Self { url, reference }
    }

    pub fn is_local(&self) -> bool {
        is_local(&self.url)
    }
}

/// `./x`, `../x`, `~/x`, `/x`, `.` and `~`
pub fn is_local(spec: &str) -> bool {
    spec == "."
        || spec == "~"
        || spec.starts_with("./")
        || spec.starts_with("../")
        || spec.starts_with("~/")
        || spec.starts_with('/')
}

/// Resolve a local spec to an absolute path
pub fn resolve_local(spec: &str, invocation_dir: &Path) -> PathBuf {
    if spec == "~" {
        return dirs::home_dir().unwrap_or_else(|| invocation_dir.to_path_buf());
    }
    if let Some(rest) = spec.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(spec);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    normalize(&invocation_dir.join(path))
}

/// Lexically fold `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Repository name from a URL or path: last segment without `.git`
pub fn derive_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    // Dot-names would collide with the `.workshed` metadata directory
    let name = last.strip_suffix(".git").unwrap_or(last).trim_start_matches('.');
    if name.is_empty() || name == "~" {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Byte offset where the repository path starts, past any `scheme://user@host`
/// or scp-style `user@host:` authority, so an `@` in there is never a ref split.
fn authority_end(spec: &str) -> usize {
    if let Some(scheme_end) = spec.find("://") {
        let after = scheme_end + 3;
        return spec[after..]
            .find('/')
            .map(|i| after + i)
            .unwrap_or(spec.len());
    }

    // scp-like: user@host:path, where user and host contain no '/'
    if let Some(colon) = spec.find(':') {
        let prefix = &spec[..colon];
        if prefix.contains('@') && !prefix.contains('/') {
            return colon + 1;
        }
    }
    0
}

fn last_unescaped_at(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len())
        .rev()
        .find(|&i| bytes[i] == b'@' && (i == 0 || bytes[i - 1] != b'\\'))
}

/// `host.tld/org/repo` without a scheme
fn needs_scheme(url: &str) -> bool {
    if url.contains("://") || authority_end(url) > 0 {
        return false;
    }
    match url.split_once('/') {
        Some((host, path)) => host.contains('.') && !path.is_empty(),
        None => false,
    }
}
