use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{Shell, Utf8Decoder};
use crate::error::ConnectError;
use crate::templates::Platform;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Cr,
    Iac,
    Verb(u8),
    Sub,
    SubIac,
}

/// Strips Telnet commands out of a byte stream and refuses every option.
///
/// `DO x` is answered with `WONT x` and `WILL x` with `DONT x`, so the peer
/// stays in plain NVT mode. Subnegotiations are dropped, `IAC IAC` becomes a
/// literal 255 and the NUL after a bare carriage return is removed.
#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (FilterState::Data | FilterState::Cr, IAC) => FilterState::Iac,
                (FilterState::Cr, 0) => FilterState::Data,
                (FilterState::Data | FilterState::Cr, b'\r') => {
                    data.push(byte);
                    FilterState::Cr
                }
                (FilterState::Data | FilterState::Cr, _) => {
                    data.push(byte);
                    FilterState::Data
                }
                (FilterState::Iac, IAC) => {
                    data.push(IAC);
                    FilterState::Data
                }
                (FilterState::Iac, DO | DONT | WILL | WONT) => FilterState::Verb(byte),
                (FilterState::Iac, SB) => FilterState::Sub,
                (FilterState::Iac, _) => FilterState::Data,
                (FilterState::Verb(verb), option) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    FilterState::Data
                }
                (FilterState::Sub, IAC) => FilterState::SubIac,
                (FilterState::Sub, _) => FilterState::Sub,
                (FilterState::SubIac, SE) => FilterState::Data,
                (FilterState::SubIac, _) => FilterState::Sub,
            };
        }
    }
}

/// A Telnet client connection.
pub struct TelnetConnection {
    label: String,
    stream: TcpStream,
    filter: TelnetFilter,
    pending: Vec<u8>,
}

impl TelnetConnection {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ConnectError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ConnectError::ConnectTimeout(timeout))??;
        let label = format!("telnet://{host}:{port}");
        debug!("{label} connected");
        Ok(Self {
            label,
            stream,
            filter: TelnetFilter::default(),
            pending: Vec::new(),
        })
    }

    async fn fill(&mut self) -> Result<(), ConnectError> {
        let mut raw = [0u8; 4096];
        let n = self.stream.read(&mut raw).await?;
        if n == 0 {
            return Err(ConnectError::ChannelDisconnectError);
        }
        let mut replies = Vec::new();
        self.filter
            .feed(&raw[..n], &mut self.pending, &mut replies);
        if !replies.is_empty() {
            trace!("{} refusing options {:?}", self.label, replies);
            self.stream.write_all(&replies).await?;
        }
        Ok(())
    }

    /// Reads until `needle` appears and returns everything up to and
    /// including it. Bytes after the match stay buffered.
    pub async fn read_until(
        &mut self,
        needle: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ConnectError> {
        let found = tokio::time::timeout(timeout, async {
            loop {
                if let Some(pos) = self
                    .pending
                    .windows(needle.len().max(1))
                    .position(|window| window == needle)
                {
                    let end = pos + needle.len();
                    return Ok(self.pending.drain(..end).collect::<Vec<u8>>());
                }
                self.fill().await?;
            }
        })
        .await;

        match found {
            Ok(result) => result,
            Err(_) => Err(ConnectError::ExecTimeout(format!(
                "waiting for {:?}, got {:?}",
                String::from_utf8_lossy(needle),
                String::from_utf8_lossy(&self.pending)
            ))),
        }
    }

    /// Sends `text` followed by a newline.
    pub async fn write_line(&mut self, text: &str) -> Result<(), ConnectError> {
        let mut line = text.as_bytes().to_vec();
        line.push(b'\n');
        self.stream.write_all(&line).await?;
        Ok(())
    }

    /// Hands the connection to a prompt-driven [`Shell`] for `platform`.
    pub async fn into_shell(
        self,
        platform: &Platform,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Shell, ConnectError> {
        let handler = platform.handler(username, password, None)?;
        let TelnetConnection {
            label,
            stream,
            mut filter,
            pending,
        } = self;

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let mut decoder = Utf8Decoder::default();
        let buffered = decoder.decode(&pending);
        if !buffered.is_empty() {
            let _ = sender_to_user.send(buffered).await;
        }

        let io_label = label.clone();
        tokio::spawn(async move {
            let (mut reader, mut writer) = stream.into_split();
            let mut raw = [0u8; 4096];
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(err) = writer.write_all(data.as_bytes()).await {
                            debug!("{io_label} write failed: {err}");
                            break;
                        }
                    }
                    read = reader.read(&mut raw) => {
                        let n = match read {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(err) => {
                                debug!("{io_label} read failed: {err}");
                                break;
                            }
                        };
                        let mut data = Vec::new();
                        let mut replies = Vec::new();
                        filter.feed(&raw[..n], &mut data, &mut replies);
                        if !replies.is_empty() && writer.write_all(&replies).await.is_err() {
                            break;
                        }
                        let text = decoder.decode(&data);
                        if !text.is_empty()
                            && sender_to_user.send(text).await.is_err()
                        {
                            break;
                        }
                    }
                    else => break,
                }
            }
            debug!("{io_label} telnet I/O task ended");
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

    /// Closes the connection.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn options_are_refused_and_stripped() {
        let mut filter = TelnetFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(
            &[IAC, WILL, 1, b'o', b'k', IAC, DO, 31, IAC, IAC, b'\r', 0, b'\n'],
            &mut data,
            &mut replies,
        );
        assert_eq!(data, vec![b'o', b'k', 255, b'\r', b'\n']);
        assert_eq!(replies, vec![IAC, DONT, 1, IAC, WONT, 31]);
    }

    #[test]
    fn commands_split_across_reads_and_subnegotiation() {
        let mut filter = TelnetFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(&[b'a', IAC], &mut data, &mut replies);
        filter.feed(&[DO], &mut data, &mut replies);
        filter.feed(&[24, IAC, SB, 24, 1, IAC, SE, b'b'], &mut data, &mut replies);
        assert_eq!(data, b"ab".to_vec());
        assert_eq!(replies, vec![IAC, WONT, 24]);
    }

    #[tokio::test]
    async fn read_until_keeps_the_rest_buffered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            sock.write_all(&[IAC, DO, 1]).await.expect("write");
            sock.write_all(b"banner\r\nlogin: ").await.expect("write");
            let mut reply = [0u8; 3];
            sock.read_exact(&mut reply).await.expect("refusal");
            assert_eq!(reply, [IAC, WONT, 1]);
            sock.write_all(b"# extra").await.expect("write");
            let mut sink = Vec::new();
            let _ = sock.read_to_end(&mut sink).await;
        });

        let mut conn = TelnetConnection::connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .expect("connect");
        let got = conn
            .read_until(b"login: ", Duration::from_secs(5))
            .await
            .expect("login prompt");
        assert_eq!(got, b"banner\r\nlogin: ".to_vec());
        let got = conn
            .read_until(b"#", Duration::from_secs(5))
            .await
            .expect("hash");
        assert_eq!(got, b"#".to_vec());
        assert!(matches!(
            conn.read_until(b"never", Duration::from_millis(100)).await,
            Err(ConnectError::ExecTimeout(msg)) if msg.contains("extra")
        ));
    }
}
