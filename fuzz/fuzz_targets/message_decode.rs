//! Arbitrary datagrams through the message decoder.
//!
//! Decoding must never panic. Anything that decodes must encode back to the
//! exact same bytes, since every field is fixed-width or length-prefixed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealink_proto::Message;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = Message::decode(data) else {
        return;
    };

    assert_eq!(message.encoded_len(), data.len());
    let encoded = message.to_bytes().expect("decoded message must re-encode");
    assert_eq!(&encoded[..], data);
});
