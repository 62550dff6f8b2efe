//! Plain GET of an arbitrary URL.

use reqwest::Url;

use super::{http_client, saved};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{UrlGetParams, artifact_path};
use crate::logging::HostLog;
use crate::writer::{Artifact, EncodingHint};

/// `{proto}://[user[:pass]@]host:port{urlpath}`.
pub fn build_url(host: &str, params: &UrlGetParams) -> Result<Url, CollectError> {
    let raw = format!("{}://{host}:{}{}", params.proto, params.port, params.urlpath);
    let mut url = Url::parse(&raw)
        .map_err(|err| CollectError::ProtocolError(format!("bad URL {raw}: {err}")))?;
    if let Some(username) = &params.username {
        url.set_username(username)
            .map_err(|()| CollectError::ProtocolError(format!("{raw} cannot carry a username")))?;
        url.set_password(params.password.as_deref())
            .map_err(|()| CollectError::ProtocolError(format!("{raw} cannot carry a password")))?;
    }
    Ok(url)
}

pub async fn collect(
    host: &str,
    params: &UrlGetParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    let url = build_url(host, params)?;
    log.debug(format_args!(
        "attempting {}://{}:{}{}",
        url.scheme(),
        host,
        params.port,
        url.path()
    ));

    let response = http_client(None, false)?.get(url).send().await?;
    if !response.status().is_success() {
        return Err(CollectError::ProtocolError(format!(
            "answered {}",
            response.status()
        )));
    }
    let body = response.bytes().await?.to_vec();
    let encoding = if body.is_ascii() {
        EncodingHint::AsciiPassthrough
    } else {
        EncodingHint::Binary
    };
    let status = Artifact {
        bytes: body,
        encoding,
        path: path.clone(),
    }
    .persist()?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}
