//! Ampache handshake authentication
//!
//! The handshake passphrase is SHA256(timestamp + SHA256(password)) as
//! described by the Ampache XML API.

use sha2::{Digest, Sha256};

/// API version requested from the server
pub const API_VERSION: &str = "6.0.0";

/// Client identifier sent as user agent
pub const CLIENT_NAME: &str = "ampsync";

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Passphrase for a handshake issued at `timestamp` (unix seconds)
pub fn passphrase(password: &str, timestamp: i64) -> String {
    sha256_hex(&format!("{}{}", timestamp, sha256_hex(password)))
}

/// Query parameters of the `handshake` action
pub fn handshake_params(username: &str, password: &str, timestamp: i64) -> Vec<(String, String)> {
    vec![
        ("action".to_string(), "handshake".to_string()),
        ("auth".to_string(), passphrase(password, timestamp)),
        ("timestamp".to_string(), timestamp.to_string()),
        ("version".to_string(), API_VERSION.to_string()),
        ("user".to_string(), username.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_passphrase_depends_on_timestamp() {
        let first = passphrase("secret", 1_700_000_000);
        let second = passphrase("secret", 1_700_000_001);
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(
            first,
            sha256_hex(&format!("1700000000{}", sha256_hex("secret")))
        );
    }

    #[test]
    fn test_handshake_params_contains_all_fields() {
        let params = handshake_params("user", "pass", 42);
        let keys: Vec<_> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["action", "auth", "timestamp", "version", "user"]);
        assert!(params.contains(&("timestamp".to_string(), "42".to_string())));
    }
}
