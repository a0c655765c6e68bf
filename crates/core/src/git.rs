//! Repository URL normalization.

const GIT_SUFFIX: &str = ".git";
const GITHUB_PREFIXES: [&str; 3] = ["https://github.com/", "http://github.com/", "git@github.com:"];

pub fn append_git_suffix(url: &str) -> String {
    if url.ends_with(GIT_SUFFIX) {
        url.to_string()
    } else {
        format!("{}{}", url, GIT_SUFFIX)
    }
}

pub fn trim_git_suffix(url: &str) -> &str {
    url.strip_suffix(GIT_SUFFIX).unwrap_or(url)
}

/// `org/name` for a GitHub clone or browse URL. Other hosts keep their full
/// URL minus the `.git` suffix.
pub fn repo_org_name(url: &str) -> String {
    let trimmed = trim_git_suffix(url.trim_end_matches('/'));
    let path = GITHUB_PREFIXES
        .iter()
        .find_map(|p| trimmed.strip_prefix(p))
        .unwrap_or(trimmed);
    path.to_string()
}
