//! Remote identity normalization.
//!
//! A repository's remote can be configured as HTTPS, SSH, with or without a
//! trailing `.git` or `/`. Normalization erases those differences so that
//! lookups by webhook URL compare equal against whatever form the local
//! clone uses.

/// Normalize a git remote URL for comparison.
///
/// Strips a trailing slash and a trailing `.git`, rewrites SSH-style
/// `git@host:org/repo` to `https://host/org/repo`, and lowercases the
/// result. Idempotent: normalizing twice yields the same value.
pub fn normalize_remote_url(url: &str) -> String {
    let mut url = url.trim().trim_end_matches('/');
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped;
    }

    let rewritten = match url.strip_prefix("git@") {
        Some(rest) => match rest.split_once(':') {
            Some((host, path)) => format!("https://{}/{}", host, path),
            None => url.to_string(),
        },
        None => url.to_string(),
    };

    rewritten.to_lowercase()
}

/// Whether two remote URLs refer to the same remote after normalization.
pub fn remotes_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && normalize_remote_url(a) == normalize_remote_url(b)
}
