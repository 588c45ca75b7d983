//! FaceGuard - Chunked stream encryption for hidden files
//!
//! Format:
//! ```text
//! [MAGIC 8B]["FGVAULT1"]
//! [VERSION 1B][0x01]
//! [CHUNK SIZE 4B][u32 BE, plaintext bytes per frame]
//! frame*:
//!   [LEN 4B][u32 BE, nonce + ciphertext + tag]
//!   [NONCE 12B][random]
//!   [CIPHERTEXT + TAG][AES-256-GCM]
//! ```
//!
//! Each frame authenticates `file_id | chunk_index (u64 BE) | final (u8)`.
//! Exactly one frame is final and it is the last one, so truncation at a
//! frame boundary, reordering and trailing garbage all fail authentication.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::aead::{open, seal, Cipher, TAG_LEN};
use super::keys::{VaultKey, NONCE_LEN};
use crate::error::{GuardError, GuardResult};

/// Magic bytes identifying a FaceGuard hidden file
pub const MAGIC: &[u8; 8] = b"FGVAULT1";

/// Current format version
pub const VERSION: u8 = 0x01;

/// Header size: MAGIC(8) + VERSION(1) + CHUNK SIZE(4)
pub const HEADER_LEN: usize = 8 + 1 + 4;

/// Largest chunk size a reader will accept
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Result of a completed stream pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Plaintext bytes processed
    pub plaintext_len: u64,
    pub frames: u64,
    /// Hex SHA-256 of the plaintext
    pub sha256: String,
}

fn frame_aad(file_id: &str, index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(file_id.len() + 9);
    aad.extend_from_slice(file_id.as_bytes());
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(is_final as u8);
    aad
}

/// Fill `buf` as far as the reader allows; short only at EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypt `reader` into `writer` frame by frame
pub fn encrypt_stream<R: Read, W: Write>(
    key: &VaultKey,
    file_id: &str,
    chunk_size: usize,
    mut reader: R,
    mut writer: W,
) -> GuardResult<StreamSummary> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(GuardError::Validation(format!("unsupported chunk size {}", chunk_size)));
    }

    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;
    writer.write_all(&(chunk_size as u32).to_be_bytes())?;

    let mut hasher = Sha256::new();
    let mut current = Zeroizing::new(vec![0u8; chunk_size]);
    let mut next = Zeroizing::new(vec![0u8; chunk_size]);
    let mut len = read_full(&mut reader, &mut current)?;
    let mut index = 0u64;
    let mut total = 0u64;

    loop {
        // Read ahead one chunk to learn whether `current` is the last
        let next_len = if len == chunk_size {
            read_full(&mut reader, &mut next)?
        } else {
            0
        };
        let is_final = next_len == 0;

        let plaintext = &current[..len];
        hasher.update(plaintext);
        let body = seal(Cipher::AesGcm, key, plaintext, &frame_aad(file_id, index, is_final))?;

        writer.write_all(&(body.len() as u32).to_be_bytes())?;
        writer.write_all(&body)?;
        total += len as u64;

        if is_final {
            break;
        }

        std::mem::swap(&mut current, &mut next);
        len = next_len;
        index += 1;
    }

    writer.flush()?;

    Ok(StreamSummary {
        plaintext_len: total,
        frames: index + 1,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Decrypt a stream produced by [`encrypt_stream`]
pub fn decrypt_stream<R: Read, W: Write>(
    key: &VaultKey,
    file_id: &str,
    mut reader: R,
    mut writer: W,
) -> GuardResult<StreamSummary> {
    let mut header = [0u8; HEADER_LEN];
    if read_full(&mut reader, &mut header)? != HEADER_LEN {
        return Err(GuardError::Crypto("truncated header".into()));
    }
    if &header[..8] != MAGIC {
        return Err(GuardError::Crypto("invalid magic bytes".into()));
    }
    if header[8] != VERSION {
        return Err(GuardError::Crypto(format!("unsupported version {}", header[8])));
    }

    let chunk_size = u32::from_be_bytes([header[9], header[10], header[11], header[12]]) as usize;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(GuardError::Crypto(format!("invalid chunk size {}", chunk_size)));
    }
    let max_frame = NONCE_LEN + chunk_size + TAG_LEN;

    let mut hasher = Sha256::new();
    let mut index = 0u64;
    let mut total = 0u64;

    let mut pending = read_frame_len(&mut reader)?
        .ok_or_else(|| GuardError::Crypto("no frames".into()))?;

    loop {
        if pending < NONCE_LEN + TAG_LEN || pending > max_frame {
            return Err(GuardError::Crypto(format!("invalid frame length {}", pending)));
        }

        let mut body = vec![0u8; pending];
        if read_full(&mut reader, &mut body)? != pending {
            return Err(GuardError::Crypto("truncated frame".into()));
        }

        // A frame is final exactly when nothing follows it
        let following = read_frame_len(&mut reader)?;
        let is_final = following.is_none();

        let plaintext = open(Cipher::AesGcm, key, &body, &frame_aad(file_id, index, is_final))?;

        if !is_final && plaintext.len() != chunk_size {
            return Err(GuardError::Crypto("short non-final frame".into()));
        }

        hasher.update(plaintext.as_slice());
        writer.write_all(&plaintext)?;
        total += plaintext.len() as u64;

        match following {
            Some(len) => {
                pending = len;
                index += 1;
            }
            None => break,
        }
    }

    writer.flush()?;

    Ok(StreamSummary {
        plaintext_len: total,
        frames: index + 1,
        sha256: hex::encode(hasher.finalize()),
    })
}

fn read_frame_len<R: Read>(reader: &mut R) -> GuardResult<Option<usize>> {
    let mut len = [0u8; 4];
    match read_full(reader, &mut len)? {
        0 => Ok(None),
        4 => Ok(Some(u32::from_be_bytes(len) as usize)),
        _ => Err(GuardError::Crypto("truncated frame length".into())),
    }
}

/// Hex SHA-256 of a reader's remaining content
pub fn sha256_hex<R: Read>(mut reader: R) -> GuardResult<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = read_full(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal(key: &VaultKey, data: &[u8], chunk: usize) -> (Vec<u8>, StreamSummary) {
        let mut out = Vec::new();
        let summary = encrypt_stream(key, "file-1", chunk, data, &mut out).unwrap();
        (out, summary)
    }

    fn open(key: &VaultKey, data: &[u8]) -> GuardResult<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream(key, "file-1", data, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_frame_boundaries() {
        let key = VaultKey::generate();
        for (len, frames) in [(0usize, 1u64), (15, 1), (16, 1), (17, 2), (48, 3), (100, 7)] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let (sealed, summary) = seal(&key, &data, 16);

            assert_eq!(summary.frames, frames, "len {}", len);
            assert_eq!(summary.plaintext_len, len as u64);
            assert_eq!(open(&key, &sealed).unwrap(), data);
        }
    }

    #[test]
    fn test_hash_matches_plaintext() {
        let key = VaultKey::generate();
        let data = vec![7u8; 20_000];
        let (sealed, summary) = seal(&key, &data, 8192);

        assert_eq!(summary.sha256, sha256_hex(data.as_slice()).unwrap());
        let mut out = Vec::new();
        let opened = decrypt_stream(&key, "file-1", sealed.as_slice(), &mut out).unwrap();
        assert_eq!(opened, summary);
    }

    #[test]
    fn test_truncation_at_frame_boundary_detected() {
        let key = VaultKey::generate();
        let (sealed, _) = seal(&key, &[1u8; 40], 16);

        // header + first full frame (4 + 12 + 16 + 16)
        let cut = HEADER_LEN + 4 + NONCE_LEN + 16 + TAG_LEN;
        assert!(matches!(open(&key, &sealed[..cut]), Err(GuardError::Crypto(_))));
    }

    #[test]
    fn test_trailing_data_detected() {
        let key = VaultKey::generate();
        let (mut sealed, _) = seal(&key, b"hello", 16);
        let copy = sealed[HEADER_LEN..].to_vec();
        sealed.extend_from_slice(&copy);

        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_wrong_file_id_or_key() {
        let key = VaultKey::generate();
        let (sealed, _) = seal(&key, b"hello", 16);

        let mut out = Vec::new();
        assert!(decrypt_stream(&key, "file-2", sealed.as_slice(), &mut out).is_err());
        assert!(open(&VaultKey::generate(), &sealed).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let key = VaultKey::generate();
        let (mut sealed, _) = seal(&key, b"hello", 16);
        sealed[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&1_000_000u32.to_be_bytes());

        assert!(matches!(open(&key, &sealed), Err(GuardError::Crypto(_))));
    }

    #[test]
    fn test_bad_header() {
        let key = VaultKey::generate();
        assert!(open(&key, b"NOTAVAULTFILE").is_err());
        assert!(open(&key, b"FGV").is_err());
    }
}
