use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha1::{Digest, Sha1};

pub(crate) const UUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a handshake key.
pub fn generate_accept(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(UUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Generates a random `Sec-WebSocket-Key` from `length` CSPRNG bytes.
pub fn generate_key(length: usize) -> String {
    let mut rng = StdRng::from_rng(&mut rand::thread_rng());
    let mut random_bytes = vec![0u8; length];
    rng.fill_bytes(&mut random_bytes);
    BASE64_STANDARD.encode(random_bytes)
}

/// Checks an accept value against the expected one for `key` without
/// leaking the mismatch position through timing.
pub fn validate_accept(accept: &str, key: &str) -> bool {
    let expected = generate_accept(key);
    let accept = accept.as_bytes();
    let expected = expected.as_bytes();
    if accept.len() != expected.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in accept.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_for_rfc_sample_key() {
        // Sample handshake from RFC 6455 section 1.3
        let accept = generate_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_validate_accept_round_trip() {
        let key = generate_key(16);
        let accept = generate_accept(&key);
        assert!(validate_accept(&accept, &key));
    }

    #[test]
    fn test_validate_accept_rejects_tampering() {
        let key = generate_key(16);
        let accept = generate_accept(&key);

        let mut tampered = accept.clone().into_bytes();
        tampered[0] ^= 0x01;
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!validate_accept(&tampered, &key));

        let mut tampered_key = key.clone().into_bytes();
        tampered_key[0] ^= 0x01;
        let tampered_key = String::from_utf8(tampered_key).unwrap();
        assert!(!validate_accept(&accept, &tampered_key));
    }

    #[test]
    fn test_generate_key_length() {
        let key = generate_key(16);
        assert_eq!(BASE64_STANDARD.decode(key).unwrap().len(), 16);
    }
}
