//! Device adapters.
//!
//! Each submodule knows one device family's handshake and returns an
//! [`Outcome`] or a [`CollectError`]. [`DeviceCollector`] routes a job to the
//! adapter its parameters name.

pub mod http_export;
pub mod mediacento;
pub mod peplink;
pub mod pfsense;
pub mod qflex;
pub mod scp_pull;
pub mod ssh_command;
pub mod ssh_push;
pub mod url_fetch;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::config::{HTTP_CONNECT_TIMEOUT, HTTP_READ_TIMEOUT, SESSION_CONNECT_TIMEOUT};
use crate::dispatch::{Collector, Outcome};
use crate::error::CollectError;
use crate::job::{Job, JobParams};
use crate::logging::HostLog;
use crate::session::{ConnectionSecurityOptions, SecurityLevel, Shell, SshSession, SshTarget};
use crate::templates::Platform;
use crate::writer::WriteStatus;

/// Collects any job by dispatching on its parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCollector;

#[async_trait]
impl Collector for DeviceCollector {
    async fn collect(&self, job: &Job, log: &HostLog) -> Result<Outcome, CollectError> {
        let host = job.host.as_str();
        match &job.params {
            JobParams::Advantech(params) => http_export::collect_advantech(host, params, log).await,
            JobParams::PepperlFuchs(params) => {
                http_export::collect_pepperl_fuchs(host, job.display_name(), params, log).await
            }
            JobParams::MediaCento(params) => mediacento::collect(host, params, log).await,
            JobParams::Peplink(params) => peplink::collect(host, params, log).await,
            JobParams::PfSense(params) => pfsense::collect(host, params, log).await,
            JobParams::QFlex(params) => qflex::collect(host, params, log).await,
            JobParams::Scp(params) => scp_pull::collect(host, params, log).await,
            JobParams::SshPush(params) => ssh_push::collect(host, params, log).await,
            JobParams::SshCommand(params) => ssh_command::collect(host, params, log).await,
            JobParams::UrlGet(params) => url_fetch::collect(host, params, log).await,
        }
    }
}

/// HTTP client with the connect and read timeouts every device call uses.
/// `total` additionally bounds whole requests; `session` keeps cookies.
/// Device certificates are self-signed, so they are not verified.
pub(crate) fn http_client(
    total: Option<Duration>,
    session: bool,
) -> Result<reqwest::Client, CollectError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .read_timeout(HTTP_READ_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .cookie_store(session);
    if let Some(total) = total {
        builder = builder.timeout(total);
    }
    Ok(builder.build()?)
}

/// The `charset` parameter of a response's content type.
pub(crate) fn charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

pub(crate) fn ssh_target(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    secret: Option<&str>,
    level: SecurityLevel,
) -> SshTarget {
    SshTarget {
        host: host.to_string(),
        port,
        username: username.to_string(),
        password: password.to_string(),
        secret: secret.map(str::to_string),
        security: ConnectionSecurityOptions::for_level(level),
    }
}

/// Logs in, waits for the shell and climbs to the platform's privileged
/// mode. The session is closed again if any step after connecting fails.
pub(crate) async fn open_shell(
    target: &SshTarget,
    platform: &Platform,
    timeout: Duration,
    log: &HostLog,
) -> Result<(SshSession, Shell), CollectError> {
    log.debug(format_args!(
        "connecting to {}:{} as {} ({})",
        target.host, target.port, target.username, platform.name
    ));
    let session = SshSession::connect(target, SESSION_CONNECT_TIMEOUT).await?;
    let shell = match privileged_shell(&session, platform, timeout, log).await {
        Ok(shell) => shell,
        Err(err) => {
            session.disconnect().await;
            return Err(err);
        }
    };
    Ok((session, shell))
}

async fn privileged_shell(
    session: &SshSession,
    platform: &Platform,
    timeout: Duration,
    log: &HostLog,
) -> Result<Shell, CollectError> {
    let mut shell = session.shell(platform, timeout).await?;
    log.debug(format_args!("shell ready at {:?}", shell.prompt()));
    if let Some(mode) = platform.privileged {
        shell.enter_mode(mode, timeout).await?;
        log.debug(format_args!("entered {mode} mode"));
    }
    Ok(shell)
}

/// Logs a write and hands back its path for the outcome.
pub(crate) fn saved(path: &Path, status: WriteStatus, log: &HostLog) -> PathBuf {
    match status {
        WriteStatus::Written => log.debug(format_args!("wrote {}", path.display())),
        WriteStatus::Unchanged => log.debug(format_args!("{} unchanged", path.display())),
    }
    path.to_path_buf()
}
