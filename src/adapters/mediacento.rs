//! Black Box MediaCento extenders: a root Telnet shell on a non-standard port
//! with no password, dumping its settings with `astparam dump`.

use std::time::Duration;

use super::saved;
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{MediaCentoParams, artifact_path};
use crate::logging::HostLog;
use crate::session::TelnetConnection;
use crate::writer::Artifact;

/// Drops the echoed command (first line) and the trailing prompt (last line).
pub fn strip_echo_and_prompt(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return String::new();
    }
    lines[1..lines.len() - 1].join("\n")
}

pub async fn collect(
    host: &str,
    params: &MediaCentoParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    let timeout = Duration::from_secs(params.timeout);
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );

    let mut conn = TelnetConnection::connect(host, params.port, timeout).await?;
    conn.read_until(b"login: ", timeout).await?;
    conn.write_line(&params.username).await?;
    conn.read_until(b"#", timeout).await?;
    log.debug(format_args!("logged in as {}", params.username));

    conn.write_line(&params.remote_cmd).await?;
    let raw = conn.read_until(b"#", timeout).await?;
    conn.close().await;

    let dump = strip_echo_and_prompt(&String::from_utf8_lossy(&raw));
    let status = Artifact::text(&path, dump).persist()?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}
