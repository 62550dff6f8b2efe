//! Unauthenticated HTTP config export (Advantech routers, Pepperl+Fuchs
//! serial servers).
//!
//! Older Advantech firmware serves the export under a different URL, so a 404
//! on the first URL moves on to the next one.

use reqwest::StatusCode;

use super::{charset, http_client, saved};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{AdvantechParams, PepperlFuchsParams, artifact_path};
use crate::logging::HostLog;
use crate::writer::{normalize_text, write_artifact};

pub fn advantech_urls(host: &str, port: u16) -> [String; 2] {
    [
        format!("http://{host}:{port}/cgi-bin/result.cgi?types=export"),
        format!("http://{host}:{port}/cgi-bin/index.cgi?func=doexport"),
    ]
}

pub fn pepperl_fuchs_url(protocol: &str, host: &str, port: u16) -> String {
    format!("{protocol}://{host}:{port}/goforms/ConfigGet")
}

fn refuse_credentials(
    username: Option<&str>,
    password: Option<&str>,
    device: &str,
) -> Result<(), CollectError> {
    if username.is_some() || password.is_some() {
        return Err(CollectError::AuthUnsupported(format!(
            "{device} exports are unauthenticated; remove username/password"
        )));
    }
    Ok(())
}

/// GETs the first URL that does not answer 404 and returns its body as UTF-8.
pub async fn fetch_export(urls: &[String], log: &HostLog) -> Result<Vec<u8>, CollectError> {
    let client = http_client(None, false)?;
    for url in urls {
        log.debug(format_args!("attempting {url}"));
        let response = client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            log.debug(format_args!("{url} answered 404"));
            continue;
        }
        if !status.is_success() {
            return Err(CollectError::ProtocolError(format!("{url} answered {status}")));
        }
        let declared = charset(response.headers());
        let body = response.bytes().await?;
        log.debug(format_args!("{} bytes from {url}", body.len()));
        return Ok(normalize_text(&body, declared.as_deref()));
    }
    Err(CollectError::ProtocolError(format!(
        "no export URL found ({} tried)",
        urls.len()
    )))
}

pub async fn collect_advantech(
    host: &str,
    params: &AdvantechParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    refuse_credentials(
        params.username.as_deref(),
        params.password.as_deref(),
        "advantech",
    )?;
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    let body = fetch_export(&advantech_urls(host, params.port), log).await?;
    let status = write_artifact(&path, &body)?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

/// `name` is the `hostname` override when configured, else the address.
pub async fn collect_pepperl_fuchs(
    host: &str,
    name: &str,
    params: &PepperlFuchsParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    refuse_credentials(
        params.username.as_deref(),
        params.password.as_deref(),
        "pepperlfuchs",
    )?;
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        name,
        &params.filename_extension,
    );
    let url = pepperl_fuchs_url(&params.protocol, host, params.port);
    let body = fetch_export(&[url], log).await?;
    let status = write_artifact(&path, &body)?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_urls() {
        let [primary, legacy] = advantech_urls("10.1.1.1", 8080);
        assert_eq!(primary, "http://10.1.1.1:8080/cgi-bin/result.cgi?types=export");
        assert_eq!(legacy, "http://10.1.1.1:8080/cgi-bin/index.cgi?func=doexport");
        assert_eq!(
            pepperl_fuchs_url("https", "ser1", 443),
            "https://ser1:443/goforms/ConfigGet"
        );
    }

    #[test]
    fn credentials_are_refused() {
        assert!(refuse_credentials(None, None, "advantech").is_ok());
        assert!(matches!(
            refuse_credentials(Some("admin"), None, "advantech"),
            Err(CollectError::AuthUnsupported(_))
        ));
        assert!(matches!(
            refuse_credentials(None, Some(""), "pepperlfuchs"),
            Err(CollectError::AuthUnsupported(_))
        ));
    }
}
