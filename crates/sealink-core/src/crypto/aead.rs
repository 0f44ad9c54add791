//! ChaCha20-Poly1305 sealing for DATA messages.
//!
//! The 96-bit nonce is `0x00000000 || session_number || sequence_number`
//! (big endian). Keys are per session and per direction, and sequence numbers
//! never repeat within a session, so a nonce is never reused under one key.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use sealink_proto::TAG_SIZE;

use crate::error::ChannelError;

/// AEAD nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// Encrypt `plaintext`, returning the ciphertext and the detached tag.
///
/// # Errors
///
/// Returns `AuthenticationFailed` if the cipher refuses the input (only
/// possible for inputs beyond ChaCha20's 256 GiB limit).
pub fn seal(
    key: &[u8; 32],
    session_number: u32,
    sequence_number: u32,
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), ChannelError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = make_nonce(session_number, sequence_number);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&Nonce::from(nonce), associated_data, &mut buffer)
        .map_err(|_| ChannelError::AuthenticationFailed)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Decrypt and authenticate a ciphertext with its detached tag.
///
/// # Errors
///
/// Returns `AuthenticationFailed` if the tag does not verify. No plaintext
/// is released in that case.
pub fn open(
    key: &[u8; 32],
    session_number: u32,
    sequence_number: u32,
    associated_data: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>, ChannelError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = make_nonce(session_number, sequence_number);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            &Nonce::from(nonce),
            associated_data,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| ChannelError::AuthenticationFailed)?;

    Ok(buffer)
}

fn make_nonce(session_number: u32, sequence_number: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..8].copy_from_slice(&session_number.to_be_bytes());
    nonce[8..].copy_from_slice(&sequence_number.to_be_bytes());
    nonce
}
