//! Version-discovery strategies (§4.7): GitHub releases, a user-supplied
//! regex over an arbitrary page, and a generic fallback that scrapes
//! version-like tokens out of whatever page the blueprint points at.

use regex::Regex;
use reqwest::Client;
use semver::Version;

use crate::config::UpdateHint;

/// Errors raised while discovering candidate versions.
#[derive(Debug)]
pub enum StrategyError {
    /// The HTTP request itself failed.
    Network(String),
    /// The configured `version_regex` didn't compile.
    InvalidRegex(String),
    /// `strategy: custom` was selected but no `version_regex` was given.
    MissingRegex,
    /// No URL was available to check (neither `fetch.url` nor `homepage`).
    NoSourceUrl,
    /// A `github-releases` strategy was selected but no `github.com/OWNER/REPO`
    /// could be extracted from the blueprint's URLs.
    NotAGithubUrl,
    /// No candidate version could be extracted from the response.
    NoCandidates,
}

impl std::fmt::Display for StrategyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StrategyError::Network(e) => write!(f, "network error: {e}"),
            StrategyError::InvalidRegex(e) => write!(f, "invalid version_regex: {e}"),
            StrategyError::MissingRegex => {
                write!(f, "strategy \"custom\" requires `update.version_regex`")
            }
            StrategyError::NoSourceUrl => write!(f, "no `fetch.url` or `homepage` to check"),
            StrategyError::NotAGithubUrl => {
                write!(f, "could not extract an OWNER/REPO from a github.com URL")
            }
            StrategyError::NoCandidates => write!(f, "no candidate versions found"),
        }
    }
}

impl std::error::Error for StrategyError {}

const GITHUB_API: &str = "https://api.github.com/repos";

lazy_static::lazy_static! {
    static ref GITHUB_REPO_RE: Regex = Regex::new(r"github\.com/([^/]+/[^/]+?)(?:\.git|/|$)").unwrap();
    static ref DEFAULT_VERSION_RE: Regex = Regex::new(r#"v?([0-9]+\.[0-9]+(?:\.[0-9]+)?(?:-[0-9A-Za-z.]+)?)"#).unwrap();
}

/// Discover the newest candidate version for a blueprint, given the raw
/// (unrendered) `fetch.url`/`homepage` it declares and its `update` hint.
///
/// Strategy selection: an explicit `update.strategy` wins; otherwise a
/// `github.com` URL implies `github-releases`, and anything else falls
/// back to scraping version-like tokens out of the page body.
pub async fn discover(
    client: &Client,
    fetch_url: Option<&str>,
    homepage: Option<&str>,
    hint: &UpdateHint,
) -> Result<String, StrategyError> {
    let source_url = fetch_url.or(homepage).ok_or(StrategyError::NoSourceUrl)?;
    let strategy = hint.strategy.as_deref();

    let candidates = match strategy {
        Some("custom") => {
            let pattern = hint.version_regex.as_deref().ok_or(StrategyError::MissingRegex)?;
            let body = fetch_text(client, source_url).await?;
            extract_with(&body, pattern)?
        }
        Some("github-releases") => {
            let repo = extract_github_repo(source_url).ok_or(StrategyError::NotAGithubUrl)?;
            let body = github_tags(client, GITHUB_API, &repo).await?;
            extract_with(&body, r#""name"\s*:\s*"v?([0-9][0-9A-Za-z.+-]*)""#)?
        }
        Some("generic-http") | None => {
            if let Some(repo) = extract_github_repo(source_url) {
                let body = github_tags(client, GITHUB_API, &repo).await?;
                extract_with(&body, r#""name"\s*:\s*"v?([0-9][0-9A-Za-z.+-]*)""#)?
            } else {
                let body = fetch_text(client, source_url).await?;
                extract_with(&body, DEFAULT_VERSION_RE.as_str())?
            }
        }
        Some(other) => {
            let body = fetch_text(client, source_url).await?;
            extract_with(&body, hint.version_regex.as_deref().unwrap_or_else(|| {
                log::warn!("unknown update strategy \"{other}\", falling back to default scraping");
                DEFAULT_VERSION_RE.as_str()
            }))?
        }
    };

    pick_newest(candidates).ok_or(StrategyError::NoCandidates)
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, StrategyError> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| StrategyError::Network(e.to_string()))?
        .text()
        .await
        .map_err(|e| StrategyError::Network(e.to_string()))
}

async fn github_tags(client: &Client, api_root: &str, repository: &str) -> Result<String, StrategyError> {
    let url = format!("{api_root}/{repository}/tags");
    client
        .get(url)
        .header("User-Agent", "ops2deb")
        .send()
        .await
        .map_err(|e| StrategyError::Network(e.to_string()))?
        .text()
        .await
        .map_err(|e| StrategyError::Network(e.to_string()))
}

fn extract_github_repo(url: &str) -> Option<String> {
    GITHUB_REPO_RE.captures(url).map(|c| c[1].to_string())
}

fn extract_with(body: &str, pattern: &str) -> Result<Vec<String>, StrategyError> {
    let regex = Regex::new(pattern).map_err(|e| StrategyError::InvalidRegex(e.to_string()))?;
    Ok(regex
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect())
}

fn pick_newest(candidates: Vec<String>) -> Option<String> {
    let mut parsed: Vec<(Version, String)> = candidates
        .iter()
        .filter_map(|c| Version::parse(c).ok().map(|v| (v, c.clone())))
        .collect();

    if parsed.len() == candidates.len() && !parsed.is_empty() {
        parsed.sort_by(|a, b| a.0.cmp(&b.0));
        return parsed.pop().map(|(_, raw)| raw);
    }

    candidates.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_semver_candidates_from_github_style_body() {
        let body = r#"[{"name":"v1.2.0"},{"name":"v1.10.0"},{"name":"v1.3.0"}]"#;
        let candidates = extract_with(body, r#""name"\s*:\s*"v?([0-9][0-9A-Za-z.+-]*)""#).unwrap();
        assert_eq!(pick_newest(candidates), Some("1.10.0".to_string()));
    }

    #[test]
    fn custom_regex_picks_first_capture_group() {
        let body = "download/demo-2.5.1.tar.gz\ndownload/demo-2.4.0.tar.gz";
        let candidates = extract_with(body, r"demo-([0-9.]+)\.tar\.gz").unwrap();
        assert_eq!(pick_newest(candidates), Some("2.5.1".to_string()));
    }

    #[test]
    fn github_repo_is_extracted_from_a_release_download_url() {
        let url = "https://github.com/upciti/ops2deb/releases/download/v1.0.0/ops2deb";
        assert_eq!(extract_github_repo(url), Some("upciti/ops2deb".to_string()));
    }

    #[test]
    fn non_github_urls_yield_no_repo() {
        assert_eq!(extract_github_repo("https://example.test/demo.tar.gz"), None);
    }

    #[test]
    fn non_semver_candidates_fall_back_to_string_order() {
        let candidates = vec!["build-9".to_string(), "build-10".to_string()];
        assert_eq!(pick_newest(candidates), Some("build-9".to_string()));
    }
}
