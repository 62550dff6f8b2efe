//! Teledyne Paradise Q-flex satellite modems.
//!
//! An SSH session yields two artifacts: the modem config (a uuencoded tarball
//! printed by `getcurrentconfig`) and the `getcurrent` key=value dump. When the
//! modem runs dynamic routing, the running config of every Quagga daemon is
//! fetched over Telnet as well. Each artifact is checked and written on its
//! own; a bad one never discards the others.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;

use super::{open_shell, saved, ssh_target};
use crate::config::SESSION_CONNECT_TIMEOUT;
use crate::dispatch::Outcome;
use crate::error::CollectError;
use crate::job::{QFlexParams, short_name};
use crate::logging::HostLog;
use crate::session::{Shell, TelnetConnection};
use crate::templates;
use crate::uu::decode_uu_tar_member;
use crate::writer::Artifact;

pub const ROUTING_MARKER: &str = r#"<set name="DynamicRouterEnable" value="On" />"#;
const CONFIG_MEMBER: &str = "default.conf";

/// Short name with every non-word character replaced by `_`.
pub fn base_name(host: &str) -> String {
    short_name(host)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Artifact locations under `dest` for modem `bname`.
pub fn config_path(dest: &Path, bname: &str) -> PathBuf {
    dest.join(format!("{bname}.conf"))
}

pub fn current_path(dest: &Path, bname: &str) -> PathBuf {
    dest.join("txt").join(format!("{bname}.conf"))
}

pub fn quagga_path(dest: &Path, bname: &str, daemon: &str) -> PathBuf {
    dest.join("quagga").join(format!("{bname}.{daemon}.conf"))
}

/// `getcurrent` prints one `key=value` per line.
pub fn check_getcurrent(text: &str) -> Result<(), CollectError> {
    if text.trim().is_empty() {
        return Err(CollectError::EmptyResponse("getcurrent printed nothing".to_string()));
    }
    match text.lines().position(|line| !line.contains('=')) {
        Some(index) => Err(CollectError::MalformedResponse(format!(
            "getcurrent line {} is not key=value",
            index + 1
        ))),
        None => Ok(()),
    }
}

/// Whether Quagga should be collected: this run's decoded config decides,
/// else the config saved by an earlier run.
pub fn routing_enabled(decoded: Option<&str>, saved_config: &Path) -> bool {
    match decoded {
        Some(config) => config.contains(ROUTING_MARKER),
        None => std::fs::read_to_string(saved_config)
            .map(|config| config.contains(ROUTING_MARKER))
            .unwrap_or(false),
    }
}

pub async fn collect(host: &str, params: &QFlexParams, log: &HostLog) -> Result<Outcome, CollectError> {
    let bname = base_name(host);
    let timeout = Duration::from_secs(params.timeout);

    let mut paths = Vec::new();
    let (decoded, primary_error) = match collect_primary(host, params, &bname, timeout, log).await {
        Ok(primary) => {
            paths.extend(primary.saved);
            (primary.decoded, primary.error)
        }
        Err(err) => (None, Some(err)),
    };

    paths.extend(collect_routing(host, decoded.as_deref(), params, &bname, log).await);

    match primary_error {
        Some(err) => Err(err),
        None => Ok(Outcome::Saved(paths)),
    }
}

/// Collects Quagga when `decoded`, or the config saved by an earlier run,
/// carries the routing marker. Daemon failures are logged and never fail the
/// job; the saved paths are returned.
pub async fn collect_routing(
    host: &str,
    decoded: Option<&str>,
    params: &QFlexParams,
    bname: &str,
    log: &HostLog,
) -> Vec<PathBuf> {
    if !routing_enabled(decoded, &config_path(&params.destination_dir, bname)) {
        log.debug("dynamic routing off; no Quagga to collect");
        return Vec::new();
    }
    log.info(format_args!("routing detected for {host}; collecting Quagga"));
    let mut paths = Vec::new();
    for (daemon, result) in collect_quagga(host, params, bname, log).await {
        match result {
            Ok(path) => {
                log.info(format_args!("saved Quagga {daemon} to {}", path.display()));
                paths.push(path);
            }
            Err(err) => log.error(format_args!("Quagga {daemon}: {}: {err}", err.kind())),
        }
    }
    paths
}

struct Primary {
    saved: Vec<PathBuf>,
    decoded: Option<String>,
    error: Option<CollectError>,
}

async fn collect_primary(
    host: &str,
    params: &QFlexParams,
    bname: &str,
    timeout: Duration,
    log: &HostLog,
) -> Result<Primary, CollectError> {
    let platform = templates::by_name(&params.ssh_platform)?;
    let target = ssh_target(
        host,
        params.port,
        &params.username,
        &params.password,
        None,
        params.ssh_security,
    );
    let (session, mut shell) = open_shell(&target, &platform, timeout, log).await?;

    let dest = params.destination_dir.as_path();
    let mut primary = Primary {
        saved: Vec::new(),
        decoded: None,
        error: None,
    };

    match modem_config(&mut shell, timeout).await {
        Ok(config) => {
            let path = config_path(dest, bname);
            match Artifact::text(&path, config.clone()).persist() {
                Ok(status) => primary.saved.push(saved(&path, status, log)),
                Err(err) => record(&mut primary.error, "getcurrentconfig", err, log),
            }
            primary.decoded = Some(config);
        }
        Err(err) => record(&mut primary.error, "getcurrentconfig", err, log),
    }

    match current_values(&mut shell, timeout).await {
        Ok(values) => {
            let path = current_path(dest, bname);
            match Artifact::text(&path, values).persist() {
                Ok(status) => primary.saved.push(saved(&path, status, log)),
                Err(err) => record(&mut primary.error, "getcurrent", err, log),
            }
        }
        Err(err) => record(&mut primary.error, "getcurrent", err, log),
    }

    shell.close().await;
    session.disconnect().await;
    Ok(primary)
}

fn record(slot: &mut Option<CollectError>, command: &str, err: CollectError, log: &HostLog) {
    log.error(format_args!("unsaved {command} output: {}: {err}", err.kind()));
    slot.get_or_insert(err);
}

async fn modem_config(shell: &mut Shell, timeout: Duration) -> Result<String, CollectError> {
    let output = shell.write_with_timeout("getcurrentconfig", timeout).await?;
    let member = decode_uu_tar_member(output.content.as_bytes(), CONFIG_MEMBER)?;
    let config = String::from_utf8_lossy(&member).into_owned();
    if config.trim().is_empty() {
        return Err(CollectError::EmptyResponse(format!("{CONFIG_MEMBER} is empty")));
    }
    Ok(config)
}

async fn current_values(shell: &mut Shell, timeout: Duration) -> Result<String, CollectError> {
    let output = shell.write_with_timeout("getcurrent", timeout).await?;
    check_getcurrent(&output.content)?;
    Ok(output.content)
}

/// Fetches every configured Quagga daemon concurrently. Results come back in
/// daemon name order.
pub async fn collect_quagga(
    host: &str,
    params: &QFlexParams,
    bname: &str,
    log: &HostLog,
) -> Vec<(String, Result<PathBuf, CollectError>)> {
    let timeout = Duration::from_secs(params.timeout);
    let fetches = params.quagga_ports.iter().map(|(daemon, port)| async move {
        let path = quagga_path(&params.destination_dir, bname, daemon);
        log.debug(format_args!("connecting to Quagga {daemon} at {host}:{port}"));
        let result = quagga_running_config(host, *port, &params.quagga_password, timeout)
            .await
            .and_then(|config| Artifact::text(&path, config).persist())
            .map(|status| saved(&path, status, log));
        (daemon.clone(), result)
    });
    join_all(fetches).await
}

async fn quagga_running_config(
    host: &str,
    port: u16,
    password: &str,
    timeout: Duration,
) -> Result<String, CollectError> {
    let platform = templates::quagga();
    let conn = TelnetConnection::connect(host, port, SESSION_CONNECT_TIMEOUT.min(timeout)).await?;
    let mut shell = conn.into_shell(&platform, "", password, timeout).await?;
    if let Some(mode) = platform.privileged {
        shell.enter_mode(mode, timeout).await?;
    }
    let output = shell.write_with_timeout("show running-config", timeout).await;
    shell.close().await;
    let output = output?;
    if !output.success {
        return Err(CollectError::ProtocolError(output.content));
    }
    // Over-the-air links corrupt data; a complete config ends with `end`.
    if !output.content.trim_end().ends_with("end") {
        return Err(CollectError::MalformedResponse(
            "running-config does not end with \"end\"".to_string(),
        ));
    }
    Ok(output.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_paths() {
        assert_eq!(base_name("modem-1.ship.example.org"), "modem_1");
        let dest = Path::new("/srv/qflex");
        assert_eq!(config_path(dest, "m1"), PathBuf::from("/srv/qflex/m1.conf"));
        assert_eq!(current_path(dest, "m1"), PathBuf::from("/srv/qflex/txt/m1.conf"));
        assert_eq!(
            quagga_path(dest, "m1", "bgpd"),
            PathBuf::from("/srv/qflex/quagga/m1.bgpd.conf")
        );
    }

    #[test]
    fn getcurrent_must_be_key_value() {
        assert!(check_getcurrent("1=2\n3=On\n").is_ok());
        assert!(matches!(
            check_getcurrent("1=2\ngarbage\n"),
            Err(CollectError::MalformedResponse(msg)) if msg.contains("line 2")
        ));
        assert!(matches!(
            check_getcurrent("\n"),
            Err(CollectError::EmptyResponse(_))
        ));
    }

    #[test]
    fn routing_marker_prefers_this_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let saved_config = dir.path().join("m1.conf");
        assert!(!routing_enabled(None, &saved_config));

        std::fs::write(&saved_config, format!("<config>{ROUTING_MARKER}</config>")).expect("seed");
        assert!(routing_enabled(None, &saved_config));
        assert!(!routing_enabled(Some("<config/>"), &saved_config));
        assert!(routing_enabled(Some(ROUTING_MARKER), Path::new("/nonexistent")));
    }
}
