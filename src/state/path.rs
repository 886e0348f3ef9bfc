//! Path algebra over absolute, `/`-separated keys.
//!
//! Inputs are assumed normalized by the caller: no `.`/`..` handling and no
//! collapsing of repeated separators. The root `/` is never split.

pub const ROOT: &str = "/";

/// Split `full_path` into `(parent_path, name)`.
///
/// `name` is everything after the last `/`. `parent_path` is everything
/// before it, or `/` when that separator is the leading one.
///
/// `full_path` must be non-empty, start with `/`, and not be `/` itself.
pub fn split(full_path: &str) -> (&str, &str) {
    debug_assert!(full_path.starts_with('/') && full_path != ROOT);
    match full_path.rfind('/') {
        Some(0) => (ROOT, &full_path[1..]),
        Some(i) => (&full_path[..i], &full_path[i + 1..]),
        None => (ROOT, full_path),
    }
}

pub fn parent_of(full_path: &str) -> &str {
    split(full_path).0
}

pub fn name_of(full_path: &str) -> &str {
    split(full_path).1
}

/// Build the key of `name` inside `parent`. Inverse of [`split`].
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True if `path` lies strictly below `ancestor`.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT && path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Re-root `path` (which must be `from` or lie below it) under `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = &path[from.len()..];
    format!("{}{}", to, rest)
}

/// A usable entry key: absolute and not the root.
pub fn is_entry_key(path: &str) -> bool {
    path.starts_with('/') && path != ROOT
}
