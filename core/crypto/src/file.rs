//! Streaming encryption for files of any size.
//!
//! # Format
//! ```text
//! <version digit> "." <b64url wrapped-key cipher> "." <b64url wrapped-key nonce> "."
//! <stream header, 16 bytes> <chunk 1> ... <chunk N>
//! ```
//! Each file gets a random data key, sealed under the caller's secret key
//! with the secret box. The body is a chunked stream (see [`crate::stream`])
//! under the data key, with the version digit as associated data of every
//! chunk. Every chunk but the last holds exactly `block_size` plaintext bytes.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::aead;
use crate::keys::{SecretKey, KEY_LENGTH};
use crate::message::CipherWithNonce;
use crate::stream::{
    ChunkTag, DecryptingStream, EncryptingStream, STREAM_ABYTES, STREAM_HEADER_SIZE,
};
use lockbox_common::{Error, Result};

/// Default plaintext block size (64 KiB).
pub const BLOCK_SIZE: usize = 65_536;

/// Length of the wrapped-key section: base64url of the sealed data key
/// (48 bytes), a '.', then base64url of its nonce (24 bytes).
const KEY_HEADER_LEN: usize = 64 + 1 + 32;

/// On-disk format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVersion {
    /// Every chunk was tagged final by the first encoder release.
    Initial,
    /// Reserved for a FIPS cipher suite; never decoded here.
    Fips,
    /// Only the last chunk is tagged final.
    CorrectedMessageTag,
}

impl FileVersion {
    /// Version produced by the encoder.
    pub const CURRENT: Self = FileVersion::CorrectedMessageTag;

    /// The ASCII digit written at the start of the file.
    pub fn tag(self) -> u8 {
        match self {
            FileVersion::Initial => b'1',
            FileVersion::Fips => b'2',
            FileVersion::CorrectedMessageTag => b'3',
        }
    }

    /// Parse the version digit.
    ///
    /// # Errors
    /// - Returns `Format` for anything but `1`, `2` or `3`
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'1' => Ok(FileVersion::Initial),
            b'2' => Ok(FileVersion::Fips),
            b'3' => Ok(FileVersion::CorrectedMessageTag),
            other => Err(Error::Format(format!(
                "Unrecognized file version: {:?}",
                char::from(other)
            ))),
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    if read_full(reader, &mut byte)? == 0 {
        return Err(Error::Format("Truncated file header".to_string()));
    }
    Ok(byte[0])
}

/// Directory a sibling file of `path` should be created in.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Whether `window` begins with an authentic final chunk followed by other
/// bytes.
///
/// Only the final chunk may be shorter than a block, so bytes appended after
/// it share its read window. Prefixes are tried only when the window claims
/// to be final.
fn starts_with_final_chunk(stream: &mut DecryptingStream, window: &[u8]) -> bool {
    if stream.peek_tag(window) != Some(ChunkTag::Final) {
        return false;
    }
    (STREAM_ABYTES..window.len())
        .any(|len| matches!(stream.pull(&window[..len]), Ok((_, ChunkTag::Final))))
}

/// Encrypts and decrypts files with a per-file data key.
#[derive(Debug, Clone)]
pub struct FileCodec {
    block_size: usize,
}

impl FileCodec {
    /// Create a codec using [`BLOCK_SIZE`].
    pub fn new() -> Self {
        Self {
            block_size: BLOCK_SIZE,
        }
    }

    /// Set a custom block size.
    ///
    /// The block size is not recorded in the file, so the decoding codec must
    /// use the same value.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Plaintext bytes per chunk.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Encrypt everything from `reader` into `writer`.
    ///
    /// Reads one block ahead so the last block is tagged final without
    /// reading past the end of input. Empty input produces a single empty
    /// final chunk.
    ///
    /// # Returns
    /// Number of plaintext bytes consumed.
    ///
    /// # Errors
    /// - Returns `Crypto` if `secret_key` is not KEY_LENGTH bytes
    /// - I/O errors from reader/writer
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        secret_key: &[u8],
        mut reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let version = FileVersion::CURRENT;
        let data_key = SecretKey::generate();
        let wrapped = aead::seal(secret_key, data_key.as_bytes())?;
        let mut stream = EncryptingStream::new(&data_key, &[version.tag()]);

        writer.write_all(&[version.tag(), b'.'])?;
        writer.write_all(wrapped.to_message().as_bytes())?;
        writer.write_all(b".")?;
        writer.write_all(stream.header())?;

        // Two-block queue: `head` is written once `next` tells us whether it
        // was the last one.
        let mut head = vec![0u8; self.block_size];
        let mut next = vec![0u8; self.block_size];
        let mut head_len = read_full(&mut reader, &mut head)?;
        let mut total = head_len as u64;

        loop {
            let next_len = if head_len < self.block_size {
                0
            } else {
                read_full(&mut reader, &mut next)?
            };
            let tag = if next_len == 0 {
                ChunkTag::Final
            } else {
                ChunkTag::Message
            };

            writer.write_all(&stream.push(&head[..head_len], tag)?)?;
            if tag == ChunkTag::Final {
                break;
            }

            std::mem::swap(&mut head, &mut next);
            head_len = next_len;
            total += head_len as u64;
        }

        writer.flush()?;
        Ok(total)
    }

    /// Decrypt everything from `reader` into `writer`.
    ///
    /// Version 3 files must carry message tags on every chunk but the last,
    /// which is final; anything after the final chunk is rejected. Version 1
    /// files must carry the final tag on every chunk.
    ///
    /// # Returns
    /// Number of plaintext bytes written.
    ///
    /// # Errors
    /// - `Format` for an unknown version, a truncated header or stream,
    ///   trailing data, or a chunk tag the version does not allow
    /// - `TamperDetected` if the wrapped key or any chunk fails to
    ///   authenticate (tampering or wrong key)
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        secret_key: &[u8],
        mut reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let version = FileVersion::from_tag(read_byte(&mut reader)?)?;
        if version == FileVersion::Fips {
            return Err(Error::Format(format!(
                "Unsupported file version: {:?}",
                version
            )));
        }
        if read_byte(&mut reader)? != b'.' {
            return Err(Error::TamperDetected("Malformed file header".to_string()));
        }

        let data_key = self.read_data_key(secret_key, &mut reader)?;

        let mut header = [0u8; STREAM_HEADER_SIZE];
        if read_full(&mut reader, &mut header)? != STREAM_HEADER_SIZE {
            return Err(Error::Format("Truncated stream header".to_string()));
        }
        let mut stream = DecryptingStream::new(&data_key, &header, &[version.tag()]);

        let mut chunk = vec![0u8; self.block_size + STREAM_ABYTES];
        let mut last_tag = None;
        let mut total = 0u64;

        loop {
            let chunk_len = read_full(&mut reader, &mut chunk)?;
            if chunk_len == 0 {
                break;
            }
            if version == FileVersion::CorrectedMessageTag && last_tag == Some(ChunkTag::Final) {
                return Err(Error::Format("Unexpected trailing data".to_string()));
            }

            let window = &chunk[..chunk_len];
            let (block, tag) = match stream.pull(window) {
                Ok(opened) => opened,
                Err(Error::TamperDetected(reason)) => {
                    if version == FileVersion::CorrectedMessageTag
                        && starts_with_final_chunk(&mut stream, window)
                    {
                        return Err(Error::Format("Unexpected trailing data".to_string()));
                    }
                    return Err(Error::TamperDetected(reason));
                }
                Err(e) => return Err(e),
            };
            if version == FileVersion::Initial && tag != ChunkTag::Final {
                return Err(Error::Format(
                    "Invalid decryption: legacy chunk not tagged final".to_string(),
                ));
            }

            writer.write_all(&block)?;
            total += block.len() as u64;
            last_tag = Some(tag);
        }

        if last_tag != Some(ChunkTag::Final) {
            return Err(Error::Format(
                "Invalid file: stream ended without a final chunk".to_string(),
            ));
        }

        writer.flush()?;
        Ok(total)
    }

    /// Parse `<cipher>.<nonce>.` and unwrap the data key.
    fn read_data_key<R: Read>(&self, secret_key: &[u8], reader: &mut R) -> Result<SecretKey> {
        let mut section = Vec::with_capacity(128);
        let mut separators = 0;
        loop {
            let byte = read_byte(reader)?;
            if byte == b'.' {
                separators += 1;
                if separators == 2 {
                    break;
                }
            }
            section.push(byte);
            if section.len() > KEY_HEADER_LEN {
                return Err(Error::TamperDetected("Malformed wrapped key".to_string()));
            }
        }

        let text = std::str::from_utf8(&section)
            .map_err(|_| Error::TamperDetected("Malformed wrapped key".to_string()))?;
        let wrapped = CipherWithNonce::decode(text)
            .map_err(|e| Error::TamperDetected(format!("Malformed wrapped key: {}", e)))?;

        let key_bytes = zeroize::Zeroizing::new(aead::open(secret_key, &wrapped)?);
        if key_bytes.len() != KEY_LENGTH {
            return Err(Error::TamperDetected("Unexpected data key length".to_string()));
        }
        SecretKey::from_slice(&key_bytes)
    }

    /// Encrypt `path` into a new `e2e-*.bin` file next to it.
    ///
    /// # Returns
    /// Path of the encrypted file. The caller owns it from then on.
    ///
    /// # Errors
    /// - I/O errors; no output file is left behind on failure
    pub fn encrypt_file(&self, path: &Path, secret_key: &[u8]) -> Result<PathBuf> {
        let source = File::open(path)?;
        let mut out = Builder::new()
            .prefix("e2e-")
            .suffix(".bin")
            .tempfile_in(parent_dir(path))?;

        self.encrypt_stream(
            secret_key,
            BufReader::new(source),
            BufWriter::new(out.as_file_mut()),
        )?;

        let (_, encrypted) = out.keep().map_err(|e| Error::Io(e.error))?;
        Ok(encrypted)
    }

    /// Decrypt `encrypted` into `dest`, replacing any existing contents.
    ///
    /// Plaintext is written to a temporary sibling of `dest` and moved into
    /// place only once the whole stream has authenticated, so a failed
    /// decryption never leaves partial plaintext at `dest`.
    pub fn decrypt_file(&self, encrypted: &Path, secret_key: &[u8], dest: &Path) -> Result<()> {
        let source = File::open(encrypted)?;
        let mut out = Builder::new()
            .prefix(".lockbox-")
            .tempfile_in(parent_dir(dest))?;

        self.decrypt_stream(
            secret_key,
            BufReader::new(source),
            BufWriter::new(out.as_file_mut()),
        )?;

        out.persist(dest).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl Default for FileCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Encrypt a complete byte slice.
pub fn encrypt_bytes(secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    FileCodec::new().encrypt_stream(secret_key, data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice produced by [`encrypt_bytes`].
pub fn decrypt_bytes(secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    FileCodec::new().decrypt_stream(secret_key, data, &mut output)?;
    Ok(output)
}
