//! Commit-and-push of a collection tree, run once per repository after the
//! worker pool drains.

use std::path::Path;

use chrono::Utc;
use log::{debug, info};
use tokio::process::Command;

use crate::error::GitError;

/// What [`commit_and_push`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Clean,
    Pushed,
}

/// `<user>@<host>:<dir>, confcollect update at <UTC>`.
pub fn commit_message(user: &str, host: &str, dir: &Path, at: chrono::DateTime<Utc>) -> String {
    format!(
        "{user}@{host}:{}, confcollect update at {}",
        dir.display(),
        at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

async fn git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    debug!("git {} in {}", args.join(" "), dir.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(GitError::Command {
            command: args.join(" "),
            dir: dir.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Commits every change under `dir`, rebases onto the upstream and pushes.
/// A clean tree is left alone.
pub async fn commit_and_push(dir: &Path) -> Result<CommitStatus, GitError> {
    let status = git(dir, &["status", "--porcelain"]).await?;
    if status.trim().is_empty() {
        info!("{}: no changes", dir.display());
        return Ok(CommitStatus::Clean);
    }

    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "confcollect".to_string());
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let message = commit_message(&user, &host, dir, Utc::now());
    info!("{}: committing {:?}", dir.display(), message);

    git(dir, &["add", "-A"]).await?;
    git(dir, &["commit", "-a", "-m", &message]).await?;
    git(dir, &["pull", "--rebase"]).await?;
    git(dir, &["push"]).await?;
    Ok(CommitStatus::Pushed)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn message_names_origin_and_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 4, 5, 6).unwrap();
        assert_eq!(
            commit_message("backup", "nms1", Path::new("/srv/confs"), at),
            "backup@nms1:/srv/confs, confcollect update at 2024-03-01 04:05:06 UTC"
        );
    }

    #[tokio::test]
    async fn missing_repository_is_a_command_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Either git is absent (spawn error) or it refuses a non-repository.
        match commit_and_push(dir.path()).await {
            Err(GitError::Command { command, .. }) => assert_eq!(command, "status --porcelain"),
            Err(GitError::Spawn(_)) => {}
            Ok(status) => panic!("unexpected {status:?}"),
        }
    }
}
