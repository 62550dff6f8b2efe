//! Output of a list of shell commands, captured into one artifact.

use std::time::Duration;

use super::{open_shell, saved, ssh_target};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{SshCommandParams, artifact_path};
use crate::logging::HostLog;
use crate::session::Shell;
use crate::templates;
use crate::writer::{StagedArtifact, WriteStatus, write_atomic};

/// One command's section of the artifact.
pub fn section(command: &str, output: &str) -> String {
    format!("# {command}\n{output}\n\n")
}

pub async fn collect(
    host: &str,
    params: &SshCommandParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
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

    let mut staged = write_atomic(&path)?;
    log.debug(format_args!("caching in {}", staged.staging_path().display()));

    let (session, mut shell) = open_shell(&target, &platform, timeout, log).await?;
    let result = capture(&mut shell, &params.commands, &mut staged, timeout, log).await;
    shell.close().await;
    session.disconnect().await;
    result?;

    let status: WriteStatus = staged.commit()?;
    log.info(format_args!("moved capture to {}", path.display()));
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}

async fn capture(
    shell: &mut Shell,
    commands: &[String],
    staged: &mut StagedArtifact,
    timeout: Duration,
    log: &HostLog,
) -> Result<(), CollectError> {
    for command in commands {
        log.debug(format_args!("sending {command:?}"));
        let output = shell.write_with_timeout(command, timeout).await?;
        if !output.success {
            log.warn(format_args!("{command:?} reported an error"));
        }
        log.debug(&output.content);
        staged.write_all(section(command, &output.content).as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_headed_by_the_command() {
        assert_eq!(
            section("show version", "v1.2"),
            "# show version\nv1.2\n\n"
        );
    }
}
