//! Cisco SG-300 switches cannot serve SCP, so the switch is told to copy its
//! config to this machine, and the file is then moved from where it landed.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{open_shell, saved, ssh_target};
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{SshPushParams, artifact_path};
use crate::logging::HostLog;
use crate::templates;
use crate::writer::move_into_place;

/// The switch-side command that pushes `remote_filename` to us.
pub fn push_command(
    remote_filename: &str,
    dest_username: &str,
    dest_password: &str,
    dest_host: &str,
    basename: &str,
) -> String {
    format!("copy {remote_filename} scp://{dest_username}:{dest_password}@{dest_host}/{basename}")
}

fn local_user() -> Result<String, CollectError> {
    ["USER", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|user| !user.is_empty()))
        .ok_or_else(|| CollectError::Unhandled("cannot tell the local user name".to_string()))
}

/// Prefers IPv4. Loopback addresses are never chosen; the switch would push
/// to itself.
fn pick_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    let reachable = || addresses.iter().filter(|ip| !ip.is_loopback());
    reachable()
        .find(|ip| ip.is_ipv4())
        .or_else(|| reachable().next())
        .copied()
}

/// An address of the local hostname, else the source address the kernel
/// would use to reach `peer`.
async fn local_address(peer: &str) -> Result<String, CollectError> {
    let name = hostname::get()?.to_string_lossy().into_owned();
    let addresses: Vec<IpAddr> = match tokio::net::lookup_host((name.as_str(), 0)).await {
        Ok(resolved) => resolved.map(|addr| addr.ip()).collect(),
        Err(_) => Vec::new(),
    };
    if let Some(ip) = pick_address(&addresses) {
        return Ok(ip.to_string());
    }

    let socket = tokio::net::UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect((peer, 22)).await?;
    let ip = socket.local_addr()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(CollectError::Unhandled(format!(
            "{name} has no address {peer} can reach"
        )));
    }
    Ok(ip.to_string())
}

fn landing_dir(configured: Option<&Path>) -> Result<PathBuf, CollectError> {
    match configured {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| CollectError::Unhandled("HOME is not set".to_string())),
    }
}

pub async fn collect(
    host: &str,
    params: &SshPushParams,
    log: &HostLog,
) -> Result<Outcome, CollectError> {
    let platform = templates::cisco_s300();
    let timeout = Duration::from_secs(params.timeout);
    let path = artifact_path(
        &params.destination_dir,
        params.local_filename.as_deref(),
        host,
        &params.filename_extension,
    );
    let basename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CollectError::Unhandled(format!("{} has no file name", path.display())))?;

    let dest_username = match &params.dest_username {
        Some(user) => user.clone(),
        None => local_user()?,
    };
    let dest_host = match &params.dest_host {
        Some(dest) => dest.clone(),
        None => local_address(host).await?,
    };
    let landing = landing_dir(params.landing_dir.as_deref())?.join(&basename);
    match std::fs::remove_file(&landing) {
        Ok(()) => log.debug(format_args!("removed stale {}", landing.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let command = push_command(
        &params.remote_filename,
        &dest_username,
        &params.dest_password,
        &dest_host,
        &basename,
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
    log.debug(format_args!(
        "pushing {} to {dest_username}@{dest_host}/{basename}",
        params.remote_filename
    ));
    let output = shell.write_with_timeout(&command, timeout).await;
    shell.close().await;
    session.disconnect().await;

    let output = output?;
    log.info(output.content.trim());
    if !output.success {
        return Err(CollectError::ProtocolError(format!(
            "copy failed: {}",
            output.content.trim()
        )));
    }

    let status = move_into_place(&landing, &path)?;
    Ok(Outcome::Saved(vec![saved(&path, status, log)]))
}
