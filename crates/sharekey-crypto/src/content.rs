//! Whole-buffer content sealing
//!
//! Layout: `header || nonce || ciphertext`. The header bytes are the AEAD
//! associated data, so editing the header breaks authentication.

use crate::{
    CryptoError, Result,
    header::{Header, has_header},
    keys::{FileKey, NONCE_SIZE},
    symmetric::{Aead, Nonce},
};

/// Encrypt `plaintext` under `file_key`, prefixed with `header`.
///
/// Content that already carries a header is refused with
/// `CryptoError::AlreadyEncrypted` so it is never tagged twice.
pub fn seal_content(header: &Header, file_key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    if has_header(plaintext) {
        return Err(CryptoError::AlreadyEncrypted);
    }

    let header_bytes = header.to_bytes();
    let nonce = Nonce::generate()?;
    let ciphertext = Aead::new(file_key, header.cipher()).encrypt_with_aad(&nonce, plaintext, &header_bytes)?;

    let mut out = Vec::with_capacity(header_bytes.len() + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(nonce.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt content produced by [`seal_content`]
pub fn open_content(file_key: &FileKey, data: &[u8]) -> Result<Vec<u8>> {
    let (header, header_len) = Header::parse(data)
        .ok_or_else(|| CryptoError::InvalidHeader("content has no encryption header".to_string()))?;

    let body = &data[header_len..];
    if body.len() < NONCE_SIZE + header.cipher().tag_size() {
        return Err(CryptoError::InvalidCiphertext("sealed content is truncated".to_string()));
    }
    let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
    let nonce = Nonce::from_bytes(nonce)?;

    Aead::new(file_key, header.cipher()).decrypt_with_aad(&nonce, ciphertext, &data[..header_len])
}
