use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::project::{ResolvedProject, SourceEntry};

/// Extract the prerequisite paths from a compiler-emitted dependency file
/// (`-MMD -MF` output): a `target: prereq prereq \` rule with backslash
/// line continuations. Target tokens (ending in `:`) are dropped, so phony
/// targets from `-MP`-style output are tolerated too.
pub fn parse_depfile(data: &str) -> Vec<String> {
    let joined = data.replace("\\\r\n", " ").replace("\\\n", " ");
    joined
        .split_whitespace()
        .filter(|token| *token != "\\" && !token.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Decide whether `source` must be recompiled.
///
/// Missing object or dependency file is conservatively stale; so is a
/// prerequisite that no longer exists. Otherwise the source and every
/// recorded prerequisite are compared against the object's mtime.
pub fn is_stale(project: &ResolvedProject, source: &SourceEntry) -> bool {
    let Some(object_time) = mtime(&project.object_path(source)) else {
        return true;
    };
    let dep_path = project.dep_path(source);
    let Ok(data) = fs::read_to_string(&dep_path) else {
        return true;
    };
    let mut newest = match mtime(Path::new(&source.path)) {
        Some(time) => time,
        None => return true,
    };
    for prereq in parse_depfile(&data) {
        match mtime(Path::new(&prereq)) {
            Some(time) => newest = newest.max(time),
            None => return true,
        }
    }
    newest > object_time
}

/// Decide whether the artifact must be relinked when no source was
/// recompiled: only when it is missing or older than any input object.
/// `<objects>` entries that do not name an existing file (linker flags
/// like `-lm`, or generated files) cannot be compared and do not force a
/// relink on their own.
pub fn needs_link(project: &ResolvedProject) -> bool {
    let Some(artifact_time) = mtime(&project.artifact_path()) else {
        return true;
    };
    let mut inputs: Vec<SystemTime> = Vec::new();
    for source in &project.sources {
        match mtime(&project.object_path(source)) {
            Some(time) => inputs.push(time),
            None => return true,
        }
    }
    for object in &project.objects {
        if let Some(time) = mtime(Path::new(object)) {
            inputs.push(time);
        }
    }
    inputs.into_iter().any(|time| time >= artifact_time)
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
