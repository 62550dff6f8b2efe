use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::debug;
use russh::ChannelMsg;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::{ConnectionSecurityOptions, Shell, Utf8Decoder};
use crate::config;
use crate::error::ConnectError;
use crate::templates::Platform;

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Enable secret; the login password is used when absent.
    pub secret: Option<String>,
    pub security: ConnectionSecurityOptions,
}

impl SshTarget {
    fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// An authenticated SSH connection.
pub struct SshSession {
    client: Client,
    target: SshTarget,
}

impl SshSession {
    /// Opens the TCP connection and authenticates with the password.
    pub async fn connect(target: &SshTarget, timeout: Duration) -> Result<Self, ConnectError> {
        let ssh_config = Config {
            preferred: target.security.preferred(),
            inactivity_timeout: Some(config::SSH_INACTIVITY_TIMEOUT),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            timeout,
            Client::connect_with_config(
                (target.host.clone(), target.port),
                &target.username,
                AuthMethod::with_password(&target.password),
                target.security.server_check.clone(),
                ssh_config,
            ),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout(timeout))?
        .map_err(|err| ConnectError::ConnectFailed(err.to_string()))?;
        debug!("{} authenticated", target.label());

        Ok(Self {
            client,
            target: target.clone(),
        })
    }

    /// Requests a PTY shell and waits for its first prompt. The platform's
    /// setup commands run before the shell is handed out.
    pub async fn shell(&self, platform: &Platform, timeout: Duration) -> Result<Shell, ConnectError> {
        let label = self.target.label();
        let handler = platform.handler(
            &self.target.username,
            &self.target.password,
            self.target.secret.as_deref(),
        )?;

        let mut channel = self.client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 511, 24, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_label = label.clone();
        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(err) = channel.data(data.as_bytes()).await {
                            debug!("{io_label} write to shell failed: {err:?}");
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = decoder.decode(data);
                                if text.is_empty() {
                                    continue;
                                }
                                if sender_to_user.send(text).await.is_err() {
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{io_label} shell exited with {exit_status}");
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => break,
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{io_label} shell I/O task ended");
        });

        let mut shell = Shell::attach(
            label,
            sender_to_shell,
            receiver_from_shell,
            handler,
            timeout,
        )
        .await?;
        shell.run_setup(&platform.setup, timeout).await;
        Ok(shell)
    }

    /// Runs `command` on a fresh exec channel and returns its byte stream.
    pub async fn exec(
        &self,
        command: &str,
    ) -> Result<impl AsyncRead + AsyncWrite + Unpin + Send + use<>, ConnectError> {
        let channel = self.client.get_channel().await?;
        channel.exec(true, command).await?;
        Ok(channel.into_stream())
    }

    pub async fn disconnect(self) {
        if let Err(err) = self.client.disconnect().await {
            debug!("{} disconnect: {err}", self.target.label());
        }
    }
}
