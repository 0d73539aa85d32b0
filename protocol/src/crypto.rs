use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::ProtocolError;
use crate::media::{MediaHeader, HEADER_LEN};
use crate::packet::SECRET_KEY_LEN;

/// Encryption mode name negotiated in `SELECT_PROTOCOL`.
pub const MODE_CHACHA20_POLY1305: &str = "aead_chacha20_poly1305_rtpsize";

/// Modes this crate can seal and open, in order of preference.
pub const SUPPORTED_MODES: &[&str] = &[MODE_CHACHA20_POLY1305];

const TAG_LEN: usize = 16;
const NONCE_SUFFIX_LEN: usize = 4;

/// Seals and opens media datagrams with the session key.
///
/// Datagram layout: `[header: 12][ciphertext + tag][nonce: u32 BE]`. The header
/// is authenticated but sent in the clear; the 12-byte AEAD nonce is the
/// 4-byte counter followed by zeros.
#[derive(Clone)]
pub struct MediaCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for MediaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCipher").finish_non_exhaustive()
    }
}

impl MediaCipher {
    #[must_use]
    pub fn new(secret_key: &[u8; SECRET_KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(secret_key)),
        }
    }

    fn nonce(counter: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..NONCE_SUFFIX_LEN].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Builds a complete datagram for one encoded frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Sealing`] if the AEAD rejects the input.
    pub fn seal(
        &self,
        header: &MediaHeader,
        payload: &[u8],
        counter: u32,
    ) -> Result<Vec<u8>, ProtocolError> {
        let header_bytes = header.encode();
        let nonce = Self::nonce(counter);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &header_bytes,
                },
            )
            .map_err(|_| ProtocolError::Sealing)?;

        let mut datagram = Vec::with_capacity(HEADER_LEN + sealed.len() + NONCE_SUFFIX_LEN);
        datagram.extend_from_slice(&header_bytes);
        datagram.extend_from_slice(&sealed);
        datagram.extend_from_slice(&counter.to_be_bytes());
        Ok(datagram)
    }

    /// Authenticates and decrypts a datagram produced by [`MediaCipher::seal`].
    ///
    /// # Errors
    /// Returns error if the datagram is truncated, has a bad header or fails
    /// authentication.
    pub fn open(&self, datagram: &[u8]) -> Result<(MediaHeader, Vec<u8>), ProtocolError> {
        let min = HEADER_LEN + TAG_LEN + NONCE_SUFFIX_LEN;
        if datagram.len() < min {
            return Err(ProtocolError::PacketTooShort {
                expected: min,
                got: datagram.len(),
            });
        }
        let header = MediaHeader::decode(datagram)?;
        let (body, suffix) = datagram.split_at(datagram.len() - NONCE_SUFFIX_LEN);
        let mut counter = [0u8; NONCE_SUFFIX_LEN];
        counter.copy_from_slice(suffix);
        let nonce = Self::nonce(u32::from_be_bytes(counter));

        let payload = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &body[HEADER_LEN..],
                    aad: &body[..HEADER_LEN],
                },
            )
            .map_err(|_| ProtocolError::Unsealing)?;
        Ok((header, payload))
    }
}
