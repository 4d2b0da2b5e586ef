//! Lexical path handling.
//!
//! All driver-facing paths are normalized to absolute, forward-slash,
//! dot-free form before any handle is looked up. Normalization is purely
//! lexical: no storage is consulted, `..` never follows a symlink.

use memchr::memrchr;
use smallvec::SmallVec;

/// Converts `path` to absolute forward-slash form, resolving `.` and
/// `..` segments lexically. Relative paths are taken as relative to
/// `cwd`, which must already be absolute. The literal path `.` maps to
/// the root.
pub(crate) fn normalize(path: &str, cwd: &str) -> String {
    if path == "." {
        return "/".to_string();
    }
    let path = to_forward_slashes(path);
    let mut stack: SmallVec<[&str; 8]> = SmallVec::new();
    if !path.starts_with('/') {
        for comp in components(cwd) {
            stack.push(comp);
        }
    }
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            // Lexical parent; popping at the root stays at the root.
            ".." => {
                stack.pop();
            }
            _ => stack.push(comp),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for comp in &stack {
        out.push('/');
        out.push_str(comp);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(windows)]
fn to_forward_slashes(path: &str) -> std::borrow::Cow<'_, str> {
    if path.contains('\\') {
        std::borrow::Cow::Owned(path.replace('\\', "/"))
    } else {
        std::borrow::Cow::Borrowed(path)
    }
}

#[cfg(not(windows))]
fn to_forward_slashes(path: &str) -> &str {
    path
}

/// Splits a normalized absolute path into `(parent, basename)`.
/// `split("/a/b")` is `("/a", "b")`; `split("/a")` is `("/", "a")`.
pub(crate) fn split(path: &str) -> (&str, &str) {
    match memrchr(b'/', path.as_bytes()) {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// Appends `name` to a normalized absolute directory path.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Non-empty components of a path, in order.
pub(crate) fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|comp| !comp.is_empty())
}
