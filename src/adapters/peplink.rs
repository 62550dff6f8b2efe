//! Peplink routers: log in to the web API, then download the binary config
//! blob with the same session cookie.

use std::path::Path;
use std::time::{Duration, SystemTime};

use super::{http_client, saved};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{PeplinkParams, artifact_path};
use crate::logging::HostLog;
use crate::writer::Artifact;

/// Age of `path`, if it exists and its mtime is in the past.
fn artifact_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Reason to skip this run, when the saved artifact is still fresh.
pub fn staleness_skip(path: &Path, min_age: Option<u64>) -> Option<String> {
    let min_age = Duration::from_secs(min_age?);
    let age = artifact_age(path)?;
    (age < min_age).then(|| {
        format!(
            "{} is {}s old, newer than min_age {}s",
            path.display(),
            age.as_secs(),
            min_age.as_secs()
        )
    })
}

pub async fn collect(
    host: &str,
    params: &PeplinkParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    if let Some(reason) = staleness_skip(&path, params.min_age) {
        return Ok(Outcome::Skipped(reason));
    }

    let client = http_client(Some(Duration::from_secs(params.timeout)), true)?;
    let base = format!("{}://{host}:{}/cgi-bin/MANGA/", params.protocol, params.port);

    log.debug(format_args!("logging in at {base}api.cgi"));
    let login = client
        .post(format!("{base}api.cgi"))
        .form(&[
            ("func", "login"),
            ("username", params.username.as_str()),
            ("password", params.password.as_str()),
        ])
        .send()
        .await?;
    if !login.status().is_success() {
        return Err(CollectError::ProtocolError(format!(
            "login answered {}",
            login.status()
        )));
    }

    let download = client
        .get(format!("{base}download_config.cgi"))
        .send()
        .await?;
    if !download.status().is_success() {
        return Err(CollectError::ProtocolError(format!(
            "config download answered {}",
            download.status()
        )));
    }
    let blob = download.bytes().await?;
    log.debug(format_args!("{} bytes of config", blob.len()));

    let status = Artifact::binary(&path, blob.to_vec()).persist()?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_artifacts_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pep1.conf");
        assert_eq!(staleness_skip(&path, Some(3600)), None);

        std::fs::write(&path, b"blob").expect("seed");
        assert!(staleness_skip(&path, Some(3600)).is_some());
        assert_eq!(staleness_skip(&path, None), None);

        let old = SystemTime::now() - Duration::from_secs(7200);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .expect("open")
            .set_modified(old)
            .expect("mtime");
        assert_eq!(staleness_skip(&path, Some(3600)), None);
    }
}
