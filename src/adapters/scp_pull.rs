//! SSH login followed by an SCP pull over the same connection.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{open_shell, saved, ssh_target};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{ScpParams, artifact_path};
use crate::logging::HostLog;
use crate::scp;
use crate::templates;
use crate::writer::{Artifact, WriteStatus, sort_lines};

pub async fn collect(host: &str, params: &ScpParams, log: &HostLog) -> Result<Outcome, CollectError> {
    let platform = templates::by_name(&params.platform)?;
    let timeout = Duration::from_secs(params.timeout);
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    let target = ssh_target(
        host,
        params.port,
        &params.username,
        &params.password,
        params.secret.as_deref(),
        params.ssh_security,
    );

    let (session, mut shell) = open_shell(&target, &platform, timeout, log).await?;
    let command = scp::source_command(&params.remote_filename, params.recursive);
    log.debug(format_args!("running {command:?}"));
    let result = match session.exec(&command).await {
        Ok(mut stream) => pull(&mut stream, params, &path, timeout, log).await,
        Err(err) => Err(err.into()),
    };
    shell.close().await;
    session.disconnect().await;

    let status = result?;
    log.info(format_args!(
        "{host}:{} transferred to {}",
        params.remote_filename,
        path.display()
    ));
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

/// Runs the sink side over an exec stream already in source mode.
async fn pull<S>(
    stream: &mut S,
    params: &ScpParams,
    path: &Path,
    timeout: Duration,
    log: &HostLog,
) -> Result<WriteStatus, CollectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if params.recursive {
        if params.sort {
            log.debug("sort ignored for recursive transfers");
        }
        return pull_tree(stream, path, timeout, log).await;
    }

    let body = tokio::time::timeout(timeout, scp::receive_file(stream))
        .await
        .map_err(|_| CollectError::ProtocolError(format!("scp transfer exceeded {timeout:?}")))??;
    let body = if params.sort { sort_lines(&body) } else { body };
    Artifact::binary(path, body).persist()
}

/// Receives into a scratch directory beside `path` and swaps it in only once
/// the whole tree arrived.
async fn pull_tree<S>(
    stream: &mut S,
    path: &Path,
    timeout: Duration,
    log: &HostLog,
) -> Result<WriteStatus, CollectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let scratch = tempfile::Builder::new()
        .prefix(".confcollect-")
        .tempdir_in(&parent)?;
    let incoming = scratch.path().join("incoming");

    let files = tokio::time::timeout(timeout, scp::receive_tree(stream, &incoming))
        .await
        .map_err(|_| CollectError::ProtocolError(format!("scp transfer exceeded {timeout:?}")))??;
    if files == 0 {
        return Err(CollectError::EmptyResponse("remote tree has no files".to_string()));
    }
    log.debug(format_args!("received {files} files"));

    swap_in(&incoming, path, &scratch.path().join("previous"))?;
    Ok(WriteStatus::Written)
}

/// Moves `incoming` to `path`, parking any existing copy at `previous`. The
/// existing copy is restored when the final move fails.
fn swap_in(incoming: &Path, path: &Path, previous: &Path) -> std::io::Result<()> {
    let parked = path.exists();
    if parked {
        std::fs::rename(path, previous)?;
    }
    if let Err(err) = std::fs::rename(incoming, path) {
        if parked {
            std::fs::rename(previous, path)?;
        }
        return Err(err);
    }
    Ok(())
}
