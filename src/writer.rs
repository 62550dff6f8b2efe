//! Persisting collected artifacts.
//!
//! Nothing here ever leaves a half-written or empty file behind: empty
//! payloads are refused before the filesystem is touched, single-buffer
//! payloads are written in one go, and multi-step captures are staged in a
//! temporary file next to the target that only replaces it on [`StagedArtifact::commit`].
//! A payload identical to what is already on disk is not rewritten.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, WINDOWS_1252};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::CollectError;

/// How the writer should treat an artifact's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingHint {
    /// Text; stored as UTF-8 whatever the device used.
    Utf8,
    /// Opaque bytes, stored untouched.
    Binary,
    /// Plain ASCII text, stored untouched.
    AsciiPassthrough,
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// The file already held exactly these bytes.
    Unchanged,
}

/// A payload on its way to disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub encoding: EncodingHint,
    pub path: PathBuf,
}

impl Artifact {
    pub fn text(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: EncodingHint::Utf8,
            path: path.into(),
        }
    }

    pub fn binary(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: EncodingHint::Binary,
            path: path.into(),
        }
    }

    /// Normalizes the payload according to its hint and writes it.
    pub fn persist(self) -> Result<WriteStatus, CollectError> {
        let bytes = match self.encoding {
            EncodingHint::Utf8 => normalize_text(&self.bytes, None),
            EncodingHint::Binary | EncodingHint::AsciiPassthrough => self.bytes,
        };
        write_artifact(&self.path, &bytes)
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn unchanged(path: &Path, new_digest: &[u8; 32]) -> bool {
    match fs::read(path) {
        Ok(existing) => digest(&existing) == *new_digest,
        Err(_) => false,
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Writes a fully buffered payload to `path`, truncating what was there.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<WriteStatus, CollectError> {
    if bytes.is_empty() {
        return Err(CollectError::EmptyResponse(format!(
            "nothing to write to {}",
            path.display()
        )));
    }
    if unchanged(path, &digest(bytes)) {
        return Ok(WriteStatus::Unchanged);
    }
    ensure_parent(path)?;
    fs::write(path, bytes)?;
    Ok(WriteStatus::Written)
}

/// A temporary file next to its destination, for payloads captured in
/// several steps. Dropping it without [`commit`](Self::commit) removes it.
pub struct StagedArtifact {
    file: NamedTempFile,
    path: PathBuf,
    hasher: Sha256,
    len: u64,
}

impl StagedArtifact {
    pub fn create(path: &Path) -> io::Result<Self> {
        ensure_parent(path)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self {
            file: NamedTempFile::new_in(dir)?,
            path: path.to_path_buf(),
            hasher: Sha256::new(),
            len: 0,
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.hasher.update(bytes);
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Temporary location, for logging.
    pub fn staging_path(&self) -> &Path {
        self.file.path()
    }

    /// Renames the staged file over the destination.
    pub fn commit(mut self) -> Result<WriteStatus, CollectError> {
        if self.len == 0 {
            return Err(CollectError::EmptyResponse(format!(
                "nothing to write to {}",
                self.path.display()
            )));
        }
        self.file.flush()?;
        let new_digest: [u8; 32] = self.hasher.finalize().into();
        if unchanged(&self.path, &new_digest) {
            return Ok(WriteStatus::Unchanged);
        }
        self.file
            .persist(&self.path)
            .map_err(|err| CollectError::Io(err.error))?;
        Ok(WriteStatus::Written)
    }
}

/// Starts a staged write to `path`.
pub fn write_atomic(path: &Path) -> io::Result<StagedArtifact> {
    StagedArtifact::create(path)
}

/// Moves a file something else deposited (`from`) onto `to`. Falls back to
/// copy and remove when a rename is not possible across filesystems. An
/// empty or identical file is discarded and `to` left alone.
pub fn move_into_place(from: &Path, to: &Path) -> Result<WriteStatus, CollectError> {
    let bytes = match fs::read(from) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CollectError::EmptyResponse(format!(
                "{} never arrived",
                from.display()
            )));
        }
        Err(err) => return Err(err.into()),
    };
    if bytes.is_empty() || unchanged(to, &digest(&bytes)) {
        fs::remove_file(from)?;
        return if bytes.is_empty() {
            Err(CollectError::EmptyResponse(format!("{} is empty", from.display())))
        } else {
            Ok(WriteStatus::Unchanged)
        };
    }
    ensure_parent(to)?;
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(WriteStatus::Written)
}

/// Returns `bytes` as UTF-8. Input that is not valid UTF-8 is decoded with
/// `charset` when given, else as Windows-1252.
pub fn normalize_text(bytes: &[u8], charset: Option<&str>) -> Vec<u8> {
    let declared = charset.and_then(|label| Encoding::for_label(label.trim().as_bytes()));
    match declared {
        Some(encoding) => {
            let (text, _, _) = encoding.decode(bytes);
            text.into_owned().into_bytes()
        }
        None => match std::str::from_utf8(bytes) {
            Ok(_) => bytes.to_vec(),
            Err(_) => {
                let (text, _, _) = WINDOWS_1252.decode(bytes);
                text.into_owned().into_bytes()
            }
        },
    }
}

/// Sorts lines ascending, keeping a trailing newline if there was one.
pub fn sort_lines(bytes: &[u8]) -> Vec<u8> {
    let trailing = bytes.ends_with(b"\n");
    let body = if trailing {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    let mut lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
    lines.sort();
    let mut sorted = lines.join(&b'\n');
    if trailing {
        sorted.push(b'\n');
    }
    sorted
}
