//! Request signing shared by the stream and REST transports.
//!
//! Onederx signs `path + body` with HMAC-SHA512 keyed by the API secret and
//! expects the digest as lowercase hex. The stream `auth` command signs
//! `"/v1/ws" + timestamp`; REST calls sign `path + serialized_payload`.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Path signed by the stream authentication handshake.
pub const WS_AUTH_PATH: &str = "/v1/ws";

/// Compute an HMAC-SHA512 signature and return it as a lowercase hex string.
pub fn hmac_sha512_sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// API key + secret pair.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), secret: secret.into() }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign `path + body`.
    pub fn sign(&self, path: &str, body: &str) -> String {
        let mut message = String::with_capacity(path.len() + body.len());
        message.push_str(path);
        message.push_str(body);
        hmac_sha512_sign(&self.secret, &message)
    }
}

// The secret never ends up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}
