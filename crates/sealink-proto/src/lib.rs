//! # Sealink Protocol: Wire Format
//!
//! This crate implements the datagram codec for the Sealink secure channel:
//! an authenticated, encrypted tunnel between peers over UDP.
//!
//! ## Message Kinds
//!
//! | Kind              | Tag    | Body                                            |
//! |-------------------|--------|-------------------------------------------------|
//! | `HELLO_REQUEST`   | `0x00` | nonce `u32`                                     |
//! | `HELLO_RESPONSE`  | `0x01` | nonce `u32`                                     |
//! | `PRESENTATION`    | `0x02` | signature cert, encryption cert, signature      |
//! | `SESSION_REQUEST` | `0x03` | session number, cipher suite, X25519 key, sig   |
//! | `SESSION`         | `0x04` | session number, cipher suite, X25519 key, sig   |
//! | `DATA`            | `0x70` | session number, sequence number, ciphertext, tag|
//!
//! Every datagram starts with a 3-byte [`MessageHeader`] (tag + big-endian
//! body length). All integers are big endian.
//!
//! ## Security Properties
//!
//! - **No Panics on Input**: [`Message::decode`] is total over `&[u8]`. Every
//!   read is bounds-checked and every failure is a [`ProtocolError`].
//!
//! - **Self-Authenticating Presentations**: PRESENTATION signatures are
//!   verified during decoding; a corrupted one never reaches the caller.
//!
//! - **Size Limits**: No message may exceed one UDP datagram
//!   ([`MAX_MESSAGE_SIZE`]).
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod errors;
pub mod header;
pub mod message_type;
pub mod messages;

pub use certificate::{Certificate, SIGNATURE_SIZE};
pub use errors::{ProtocolError, Result};
pub use header::{MAX_MESSAGE_SIZE, MessageHeader};
pub use message_type::{CipherSuite, MessageType};
pub use messages::{DataMessage, Hello, Message, Presentation, SessionMessage, TAG_SIZE};
