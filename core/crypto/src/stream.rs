//! Chunked authenticated encryption for large payloads.
//!
//! A stream is a random header followed by chunks. Each chunk is sealed with
//! XChaCha20-Poly1305 under the stream key, with nonce `header || counter`,
//! so chunks cannot be reordered, dropped or replayed without detection. The
//! first plaintext byte of every chunk is its [`ChunkTag`]; the final chunk
//! carries [`ChunkTag::Final`], which is how truncation at a chunk boundary
//! is caught.

use zeroize::Zeroizing;

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, NONCE_SIZE, TAG_SIZE};
use crate::keys::{random_bytes, SecretKey};
use lockbox_common::{Error, Result};

/// Size of the opaque stream header in bytes.
pub const STREAM_HEADER_SIZE: usize = 16;

/// Bytes a chunk adds on top of its plaintext: tag byte + Poly1305 tag.
pub const STREAM_ABYTES: usize = 1 + TAG_SIZE;

/// Chunk tag, authenticated together with the chunk contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkTag {
    /// More chunks follow.
    Message = 0x00,
    /// Last chunk of the stream.
    Final = 0x03,
}

impl ChunkTag {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(ChunkTag::Message),
            0x03 => Ok(ChunkTag::Final),
            other => Err(Error::Format(format!("Unknown chunk tag: {:#04x}", other))),
        }
    }
}

fn chunk_nonce(header: &[u8; STREAM_HEADER_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..STREAM_HEADER_SIZE].copy_from_slice(header);
    nonce[STREAM_HEADER_SIZE..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encoder side of a chunked stream.
pub struct EncryptingStream {
    key: SecretKey,
    header: [u8; STREAM_HEADER_SIZE],
    aad: Vec<u8>,
    counter: u64,
}

impl EncryptingStream {
    /// Start a new stream under `key`.
    ///
    /// `aad` is bound into every chunk; the decoder must supply the same
    /// bytes.
    pub fn new(key: &SecretKey, aad: &[u8]) -> Self {
        let mut header = [0u8; STREAM_HEADER_SIZE];
        header.copy_from_slice(&random_bytes(STREAM_HEADER_SIZE));
        Self {
            key: key.clone(),
            header,
            aad: aad.to_vec(),
            counter: 0,
        }
    }

    /// Opaque header the decoder needs to initialize.
    pub fn header(&self) -> &[u8; STREAM_HEADER_SIZE] {
        &self.header
    }

    /// Seal one block, producing a chunk of `block.len() + STREAM_ABYTES`
    /// bytes.
    pub fn push(&mut self, block: &[u8], tag: ChunkTag) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.header, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("Stream chunk counter exhausted".to_string()))?;

        let mut framed = Zeroizing::new(Vec::with_capacity(block.len() + 1));
        framed.push(tag as u8);
        framed.extend_from_slice(block);

        encrypt_with_nonce(self.key.as_bytes(), &nonce, &self.aad, &framed)
    }
}

/// Decoder side of a chunked stream.
pub struct DecryptingStream {
    key: SecretKey,
    header: [u8; STREAM_HEADER_SIZE],
    aad: Vec<u8>,
    counter: u64,
}

impl DecryptingStream {
    /// Initialize from the header written by [`EncryptingStream`].
    pub fn new(key: &SecretKey, header: &[u8; STREAM_HEADER_SIZE], aad: &[u8]) -> Self {
        Self {
            key: key.clone(),
            header: *header,
            aad: aad.to_vec(),
            counter: 0,
        }
    }

    /// Open the next chunk, returning its plaintext and tag.
    ///
    /// # Errors
    /// - `Format` if the chunk is shorter than the per-chunk overhead or its
    ///   tag byte is unknown
    /// - `TamperDetected` if the chunk does not authenticate at this position
    pub fn pull(&mut self, chunk: &[u8]) -> Result<(Vec<u8>, ChunkTag)> {
        if chunk.len() < STREAM_ABYTES {
            return Err(Error::Format("Truncated stream chunk".to_string()));
        }

        let nonce = chunk_nonce(&self.header, self.counter);
        let mut framed = decrypt_with_nonce(self.key.as_bytes(), &nonce, &self.aad, chunk)?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("Stream chunk counter exhausted".to_string()))?;

        let tag = ChunkTag::from_byte(framed[0])?;
        framed.remove(0);
        Ok((framed, tag))
    }

    /// Tag byte of the next chunk, read without authenticating it.
    ///
    /// The keystream does not depend on the chunk length, so this reads the
    /// same tag for any prefix of `chunk`. Never trust it on its own.
    pub fn peek_tag(&self, chunk: &[u8]) -> Option<ChunkTag> {
        let first = *chunk.first()?;
        let nonce = chunk_nonce(&self.header, self.counter);
        let keystream =
            encrypt_with_nonce(self.key.as_bytes(), &nonce, &self.aad, &[0u8]).ok()?;
        ChunkTag::from_byte(first ^ keystream[0]).ok()
    }
}
