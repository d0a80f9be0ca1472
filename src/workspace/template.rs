//! Template directory copy with `{{key}}` substitution

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Replace every `{{key}}` with its value in one left-to-right pass.
/// Unknown placeholders are kept; substituted values are never rescanned.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let key = &after[..end];
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Copy `template` into `dest`. UTF-8 files get placeholders substituted,
/// other files are copied byte for byte. `.git` directories are skipped.
/// Returns the number of files written.
pub fn copy_template(
    template: &Path,
    dest: &Path,
    vars: &HashMap<String, String>,
) -> Result<usize, String> {
    if !template.is_dir() {
        return Err(format!("template is not a directory: {}", template.display()));
    }

    let mut copied = 0;
    let walker = WalkDir::new(template)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| e.to_string())?;
        let rel = entry
            .path()
            .strip_prefix(template)
            .map_err(|e| e.to_string())?;
        let target = dest.join(substitute(&rel.to_string_lossy(), vars));

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| format!("{}: {}", target.display(), e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("{}: {}", parent.display(), e))?;
        }
        let bytes =
            fs::read(entry.path()).map_err(|e| format!("{}: {}", entry.path().display(), e))?;
        let written = match String::from_utf8(bytes) {
            Ok(text) => fs::write(&target, substitute(&text, vars)),
            Err(raw) => fs::write(&target, raw.into_bytes()),
        };
        written.map_err(|e| format!("{}: {}", target.display(), e))?;
        debug!(file = %target.display(), "Template file written");
        copied += 1;
    }

    Ok(copied)
}
