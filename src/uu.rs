//! Decoding of uuencoded tar archives, as printed by Q-flex modems.
//!
//! Everything happens on in-memory buffers: the uuencoded text is decoded to
//! bytes, gunzipped when it carries the gzip magic, and the requested member
//! is read out of the tar stream.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;

use crate::error::DecodeError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decodes one uuencoded body line. `line_no` is only used in errors.
fn a2b_uu(line: &str, line_no: usize) -> Result<Vec<u8>, DecodeError> {
    let bytes = line.as_bytes();
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let sextet = |index: usize| -> Result<u8, DecodeError> {
        match bytes.get(index) {
            // Short lines are padded with zeroes.
            None => Ok(0),
            Some(&c) if (0x20..=0x60).contains(&c) => Ok((c - 0x20) & 0x3f),
            Some(&c) => Err(DecodeError::IllegalChar(c as char, line_no)),
        }
    };
    let len = sextet(0)? as usize;

    let mut out = Vec::with_capacity(len + 2);
    let mut index = 1;
    while out.len() < len {
        let quad = [
            sextet(index)?,
            sextet(index + 1)?,
            sextet(index + 2)?,
            sextet(index + 3)?,
        ];
        out.push(quad[0] << 2 | quad[1] >> 4);
        out.push(quad[1] << 4 | quad[2] >> 2);
        out.push(quad[2] << 6 | quad[3]);
        index += 4;
    }
    out.truncate(len);
    Ok(out)
}

/// Decodes the uuencoded block framed by `begin ...` and `end` lines.
pub fn decode_uu(text: &str) -> Result<Vec<u8>, DecodeError> {
    let mut lines = text
        .lines()
        .enumerate()
        .skip_while(|(_, line)| !line.starts_with("begin"));
    if lines.next().is_none() {
        return Err(DecodeError::MissingFraming);
    }

    let mut decoded = Vec::new();
    for (line_no, line) in lines {
        let line = line.trim_end_matches('\r');
        if line.trim_end() == "end" {
            return Ok(decoded);
        }
        decoded.extend(a2b_uu(line, line_no + 1)?);
    }
    Err(DecodeError::MissingFraming)
}

fn same_member(path: &str, wanted: &str) -> bool {
    path.trim_start_matches("./") == wanted.trim_start_matches("./")
}

/// Pulls `member` out of a tar (optionally gzipped) archive held in memory.
pub fn tar_member(archive: &[u8], member: &str) -> Result<Vec<u8>, DecodeError> {
    let reader: Box<dyn Read + '_> = if archive.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(archive))
    } else {
        Box::new(Cursor::new(archive))
    };
    let mut tar = tar::Archive::new(reader);
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if same_member(&path, member) {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Err(DecodeError::MemberNotFound(member.to_string()))
}

/// Decodes uuencoded tar output and returns the bytes of `member_name`.
pub fn decode_uu_tar_member(bytes: &[u8], member_name: &str) -> Result<Vec<u8>, DecodeError> {
    let text = String::from_utf8_lossy(bytes);
    let archive = decode_uu(&text)?;
    tar_member(&archive, member_name)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn b2a_uu(chunk: &[u8]) -> String {
        let enc = |v: u8| if v == 0 { '`' } else { (v + 0x20) as char };
        let mut line = String::new();
        line.push(enc(chunk.len() as u8));
        for group in chunk.chunks(3) {
            let mut g = [0u8; 3];
            g[..group.len()].copy_from_slice(group);
            line.push(enc(g[0] >> 2));
            line.push(enc((g[0] << 4 | g[1] >> 4) & 0x3f));
            line.push(enc((g[1] << 2 | g[2] >> 6) & 0x3f));
            line.push(enc(g[2] & 0x3f));
        }
        line
    }

    fn uuencode(data: &[u8]) -> String {
        let mut text = String::from("begin 644 config.tgz\n");
        for chunk in data.chunks(45) {
            text.push_str(&b2a_uu(chunk));
            text.push('\n');
        }
        text.push_str("`\nend\n");
        text
    }

    fn tgz(name: &str, content: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content)
            .expect("append");
        let mut gz = builder.into_inner().expect("tar");
        gz.flush().expect("flush");
        gz.finish().expect("gzip")
    }

    const CONF: &[u8] = b"<config>\n<set name=\"DynamicRouterEnable\" value=\"On\" />\n</config>\n";

    #[test]
    fn known_line_decodes() {
        assert_eq!(a2b_uu("#86)C", 1).expect("line"), b"abc".to_vec());
        assert_eq!(a2b_uu("`", 1).expect("empty"), Vec::<u8>::new());
    }

    #[test]
    fn member_is_extracted_from_gzipped_tar() {
        let text = uuencode(&tgz("./default.conf", CONF));
        let with_noise = format!("getcurrentconfig\r\n{}", text.replace('\n', "\r\n"));
        let member =
            decode_uu_tar_member(with_noise.as_bytes(), "default.conf").expect("member");
        assert_eq!(member, CONF.to_vec());
    }

    #[test]
    fn missing_member_and_framing() {
        let text = uuencode(&tgz("other.conf", CONF));
        assert!(matches!(
            decode_uu_tar_member(text.as_bytes(), "default.conf"),
            Err(DecodeError::MemberNotFound(name)) if name == "default.conf"
        ));
        assert!(matches!(
            decode_uu_tar_member(b"no framing here\n", "default.conf"),
            Err(DecodeError::MissingFraming)
        ));
        let truncated = text.replace("end\n", "");
        assert!(matches!(
            decode_uu_tar_member(truncated.as_bytes(), "default.conf"),
            Err(DecodeError::MissingFraming)
        ));
    }

    #[test]
    fn corrupt_body_is_rejected() {
        assert!(matches!(
            decode_uu_tar_member(b"begin 644 x\nM~~~~\nend\n", "default.conf"),
            Err(DecodeError::IllegalChar('~', 2))
        ));
        let garbage = uuencode(&[0x1f, 0x8b, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(
            decode_uu_tar_member(garbage.as_bytes(), "default.conf"),
            Err(DecodeError::Tar(_))
        ));
    }
}
