//! Digest challenge-response authentication
//!
//! The server cannot send an HTTP 401 once the WebSocket handshake is done,
//! so it delivers its challenge by closing the `/auth` handshake socket with
//! close code 4401 and the challenge JSON in the close reason. The client
//! answers by reconnecting to `/auth?...` with HTTP-Digest-style parameters
//! embedded in the query string of the fresh connection attempt:
//!
//! ```text
//! a1       = md5(username ":" realm ":" password)
//! a2       = md5(":" uri)
//! response = md5(a1 ":" nonce ":" nc ":" cnonce ":" qop ":" a2)
//! ```
//!
//! The nonce count is eight lowercase hex digits and increases monotonically
//! per challenge use; the client nonce is a fresh random alphanumeric string
//! per attempt. The username is fixed by the server.

use bwrpc_core::{Error, Result};
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;

/// The only username the server accepts.
pub const USERNAME: &str = "bitwig";

/// Challenge payload carried in the 4401 close reason.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: String,
    pub qop: String,
}

impl Challenge {
    /// Parse the close reason of a 4401 close into a challenge.
    pub fn parse(reason: &str) -> Result<Self> {
        serde_json::from_str(reason)
            .map_err(|e| Error::Authentication(format!("malformed challenge: {}", e)))
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the digest response for a challenge.
pub fn digest_response(
    password: &str,
    realm: &str,
    nonce: &str,
    qop: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let a1 = md5_hex(&format!("{}:{}:{}", USERNAME, realm, password));
    let a2 = md5_hex(&format!(":{}", uri));
    md5_hex(&format!(
        "{}:{}:{}:{}:{}:{}",
        a1, nonce, nc, cnonce, qop, a2
    ))
}

/// Format a nonce count as eight lowercase hex digits.
pub fn format_nc(count: u32) -> String {
    format!("{:08x}", count)
}

/// A fresh 16-character alphanumeric client nonce.
pub fn random_cnonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Assemble the response query appended to the `/auth` path.
///
/// Raw `key=value` pairs without percent-encoding: the server splits on
/// `&`/`=` and does not decode, so the `uri` value must go through verbatim.
pub fn auth_query(
    challenge: &Challenge,
    password: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let response = digest_response(
        password,
        &challenge.realm,
        &challenge.nonce,
        &challenge.qop,
        uri,
        nc,
        cnonce,
    );
    format!(
        "username={}&realm={}&nonce={}&uri={}&algorithm={}&response={}&qop={}&nc={}&cnonce={}",
        USERNAME,
        challenge.realm,
        challenge.nonce,
        uri,
        challenge.algorithm,
        response,
        challenge.qop,
        nc,
        cnonce
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_known_answers() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_digest_response_known_answer() {
        // fixed challenge and password; expected value computed with the
        // reference formula (a1/a2 composition, colon-joined, md5 each step)
        let response = digest_response(
            "bitwig",
            "biwig-websocket-rpc",
            "abcdef0123456789abcde",
            "auth",
            "ws://localhost:8887/auth",
            "00000001",
            "0123456789abcdef",
        );
        assert_eq!(response, "0cd19c53525edb5dd71426f0d990e0e6");
    }

    #[test]
    fn test_digest_intermediate_values() {
        assert_eq!(
            md5_hex("bitwig:biwig-websocket-rpc:bitwig"),
            "f323a36c6db08501503292cbd651e850"
        );
        assert_eq!(
            md5_hex(":ws://localhost:8887/auth"),
            "d130b55f983c7d2639ccf3655de6551a"
        );
    }

    #[test]
    fn test_format_nc() {
        assert_eq!(format_nc(1), "00000001");
        assert_eq!(format_nc(255), "000000ff");
        assert_eq!(format_nc(0xdeadbeef), "deadbeef");
    }

    #[test]
    fn test_random_cnonce_shape() {
        let cnonce = random_cnonce();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(cnonce, random_cnonce());
    }

    #[test]
    fn test_challenge_parse() {
        let reason = r#"{"realm":"biwig-websocket-rpc","nonce":"n","algorithm":"md5","qop":"auth"}"#;
        let challenge = Challenge::parse(reason).unwrap();
        assert_eq!(challenge.realm, "biwig-websocket-rpc");
        assert_eq!(challenge.algorithm, "md5");

        assert!(Challenge::parse("not json").is_err());
    }

    #[test]
    fn test_auth_query_field_order() {
        let challenge = Challenge {
            realm: "r".to_string(),
            nonce: "n".to_string(),
            algorithm: "md5".to_string(),
            qop: "auth".to_string(),
        };
        let query = auth_query(&challenge, "pw", "ws://h:1/auth", "00000001", "cn");
        assert!(query.starts_with("username=bitwig&realm=r&nonce=n&uri=ws://h:1/auth&algorithm=md5&response="));
        assert!(query.ends_with("&qop=auth&nc=00000001&cnonce=cn"));
    }
}
