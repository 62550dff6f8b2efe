//! pfSense firewalls: the three-request backup flow of `diag_backup.php`.
//!
//! 1. GET the page for a session cookie and a CSRF token.
//! 2. POST the login form with that token; the answer carries a fresh token.
//! 3. POST the download form with the fresh token; the answer is `config.xml`.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{charset, http_client, saved};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{PfSenseParams, artifact_path};
use crate::logging::HostLog;
use crate::writer::{normalize_text, write_artifact};

static CSRF_MAGIC: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r#"name=['"]__csrf_magic['"]\s+value=['"]([^'"]+)['"]"#) {
        Ok(re) => re,
        Err(err) => panic!("invalid CSRF_MAGIC regex: {err}"),
    }
});

/// The `__csrf_magic` token of a pfSense page.
pub fn csrf_magic(page: &str) -> Option<String> {
    CSRF_MAGIC
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|token| token.as_str().to_string())
}

/// A login failure answers with the login page, not XML.
pub fn looks_like_config(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&body[..body.len().min(256)]);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<?xml") || text.starts_with("<pfsense")
}

pub async fn collect(
    host: &str,
    params: &PfSenseParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    let url = format!("{}://{host}:{}/diag_backup.php", params.protocol, params.port);
    let client = http_client(Some(Duration::from_secs(params.timeout)), true)?;

    let page = client.get(&url).send().await?.text().await?;
    let token = csrf_magic(&page).ok_or_else(|| {
        CollectError::ProtocolError(format!("no CSRF token on {url}"))
    })?;
    log.debug("collected first CSRF token");

    let page = client
        .post(&url)
        .form(&[
            ("login", "Login"),
            ("usernamefld", params.username.as_str()),
            ("passwordfld", params.password.as_str()),
            ("__csrf_magic", token.as_str()),
        ])
        .send()
        .await?
        .text()
        .await?;
    let token = csrf_magic(&page).ok_or_else(|| {
        CollectError::ProtocolError(format!("no CSRF token after login to {url}"))
    })?;
    log.debug("logged in, collected second CSRF token");

    let response = client
        .post(&url)
        .form(&[
            ("download", "download"),
            ("donotbackuprrd", "yes"),
            ("__csrf_magic", token.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(CollectError::ProtocolError(format!(
            "download answered {}",
            response.status()
        )));
    }
    let declared = charset(response.headers());
    let body = response.bytes().await?;
    if body.is_empty() {
        return Err(CollectError::EmptyResponse(format!("{url} sent no config")));
    }
    if !looks_like_config(&body) {
        return Err(CollectError::MalformedResponse(
            "download did not return config XML; login probably failed".to_string(),
        ));
    }

    let status = write_artifact(&path, &normalize_text(&body, declared.as_deref()))?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_found_in_either_quoting() {
        let page = r#"<input type='hidden' name='__csrf_magic' value="sid:abc123,1700000000" />"#;
        assert_eq!(csrf_magic(page).as_deref(), Some("sid:abc123,1700000000"));
        let page = r#"<input name="__csrf_magic" value='x;y'>"#;
        assert_eq!(csrf_magic(page).as_deref(), Some("x;y"));
        assert_eq!(csrf_magic("<html>nothing</html>"), None);
    }

    #[test]
    fn config_sniffing() {
        assert!(looks_like_config(b"<?xml version=\"1.0\"?>\n<pfsense>"));
        assert!(looks_like_config(b"\n  <pfsense>\n"));
        assert!(!looks_like_config(b"<!DOCTYPE html><html>login</html>"));
    }
}
