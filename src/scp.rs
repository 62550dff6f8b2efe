//! Receiving half of the SCP protocol.
//!
//! The remote side runs `scp -f <path>` (source mode) on an exec channel and
//! streams control records (`C`, `D`, `E`, `T`) each of which the sink
//! acknowledges with a single NUL byte.

use std::path::{Component, Path, PathBuf};

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ScpError;

/// Command that puts the remote end in source mode.
pub fn source_command(remote_path: &str, recursive: bool) -> String {
    if recursive {
        format!("scp -r -f {remote_path}")
    } else {
        format!("scp -f {remote_path}")
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Record {
    File { size: u64, name: String },
    Dir { name: String },
    End,
    Time,
}

async fn ack<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<(), ScpError> {
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, ScpError> {
    let mut line = Vec::new();
    loop {
        match stream.read_u8().await? {
            b'\n' => break,
            byte => line.push(byte),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn safe_name(name: &str) -> Result<String, ScpError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name.to_string()),
        _ => Err(ScpError::UnsafeName(name.to_string())),
    }
}

fn parse_header(kind: u8, line: &str) -> Result<Record, ScpError> {
    let mut fields = line.splitn(3, ' ');
    let (Some(mode), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(ScpError::BadHeader(line.to_string()));
    };
    if mode.len() != 4 || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(ScpError::BadHeader(line.to_string()));
    }
    let size: u64 = size
        .parse()
        .map_err(|_| ScpError::BadHeader(line.to_string()))?;
    let name = safe_name(name)?;
    Ok(if kind == b'C' {
        Record::File { size, name }
    } else {
        Record::Dir { name }
    })
}

/// Next control record, or `None` when the source closed the stream.
async fn read_record<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Record>, ScpError> {
    let kind = match stream.read_u8().await {
        Ok(kind) => kind,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let line = read_line(stream).await?;
    trace!("scp record {:?} {line:?}", kind as char);
    match kind {
        1 | 2 => Err(ScpError::Remote(line)),
        b'C' | b'D' => parse_header(kind, &line).map(Some),
        b'E' => Ok(Some(Record::End)),
        b'T' => Ok(Some(Record::Time)),
        other => Err(ScpError::BadHeader(format!(
            "{}{line}",
            String::from_utf8_lossy(&[other])
        ))),
    }
}

/// Reads `size` content bytes plus the trailing status byte.
async fn read_body<S>(stream: &mut S, size: u64) -> Result<Vec<u8>, ScpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ack(stream).await?;
    let mut body = Vec::with_capacity(size.min(16 * 1024 * 1024) as usize);
    (&mut *stream).take(size).read_to_end(&mut body).await?;
    if (body.len() as u64) < size {
        return Err(ScpError::Unexpected(format!(
            "stream ended after {} of {size} bytes",
            body.len()
        )));
    }
    match stream.read_u8().await? {
        0 => {}
        _ => return Err(ScpError::Remote(read_line(stream).await?)),
    }
    ack(stream).await?;
    Ok(body)
}

/// Receives exactly one file and returns its contents.
pub async fn receive_file<S>(stream: &mut S) -> Result<Vec<u8>, ScpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ack(stream).await?;
    loop {
        match read_record(stream).await? {
            Some(Record::Time) => ack(stream).await?,
            Some(Record::File { size, name }) => {
                trace!("scp receiving {name} ({size} bytes)");
                return read_body(stream, size).await;
            }
            Some(record) => {
                return Err(ScpError::Unexpected(format!(
                    "expected a file, got {record:?}"
                )));
            }
            None => {
                return Err(ScpError::Unexpected(
                    "stream closed before any file".to_string(),
                ));
            }
        }
    }
}

/// Receives a directory tree into `dest`, which takes the place of the
/// remote top-level directory. Returns the number of files written.
pub async fn receive_tree<S>(stream: &mut S, dest: &Path) -> Result<usize, ScpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ack(stream).await?;
    tokio::fs::create_dir_all(dest).await?;

    let mut stack: Vec<PathBuf> = Vec::new();
    let mut files = 0;
    loop {
        let record = read_record(stream).await?;
        let cwd = stack.last().cloned().unwrap_or_else(|| dest.to_path_buf());
        match record {
            Some(Record::Time) => ack(stream).await?,
            Some(Record::Dir { name }) => {
                let dir = if stack.is_empty() {
                    dest.to_path_buf()
                } else {
                    cwd.join(name)
                };
                tokio::fs::create_dir_all(&dir).await?;
                stack.push(dir);
                ack(stream).await?;
            }
            Some(Record::End) => {
                if stack.pop().is_none() {
                    return Err(ScpError::Unexpected("E without D".to_string()));
                }
                ack(stream).await?;
                if stack.is_empty() {
                    return Ok(files);
                }
            }
            Some(Record::File { size, name }) => {
                let body = read_body(stream, size).await?;
                tokio::fs::write(cwd.join(&name), body).await?;
                files += 1;
                // A single remote file instead of a directory.
                if stack.is_empty() {
                    return Ok(files);
                }
            }
            None if stack.is_empty() => return Ok(files),
            None => {
                return Err(ScpError::Unexpected(
                    "stream closed inside a directory".to_string(),
                ));
            }
        }
    }
}
