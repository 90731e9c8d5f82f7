use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Account credentials, immutable after construction and consumed only by
/// the signer.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub appid: String,
    pub secret_id: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(
        appid: impl Into<String>,
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            appid: appid.into(),
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// Computes `Authorization` tokens: a keyed digest over the canonical
/// request string, followed by the plaintext itself, base64-encoded.
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Multi-use signature, reusable until `expires_at` (unix seconds).
    pub fn sign_more(&self, bucket: &str, expires_at: i64) -> String {
        self.app_sign(bucket, "", expires_at)
    }

    /// Single-use signature bound to one exact resource id, expiry 0.
    pub fn sign_once(&self, bucket: &str, file_id: &str) -> String {
        self.app_sign(bucket, file_id, 0)
    }

    fn app_sign(&self, bucket: &str, file_id: &str, expires_at: i64) -> String {
        let nonce: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        let plain = format!(
            "a={}&k={}&e={}&t={}&r={}&f={}&b={}",
            self.credentials.appid,
            self.credentials.secret_id,
            expires_at,
            unix_now(),
            nonce,
            file_id,
            bucket
        );
        let mut mac = HmacSha1::new_from_slice(self.credentials.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(plain.as_bytes());
        let mut signed = mac.finalize().into_bytes().to_vec();
        signed.extend_from_slice(plain.as_bytes());
        STANDARD.encode(signed)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_LEN: usize = 20;

    fn signer() -> Signer {
        Signer::new(Credentials::new("100042", "sid", "skey"))
    }

    fn decode_plaintext(token: &str) -> String {
        let raw = STANDARD.decode(token).expect("token is valid base64");
        assert!(raw.len() > MAC_LEN);
        String::from_utf8(raw[MAC_LEN..].to_vec()).expect("plaintext is utf-8")
    }

    #[test]
    fn multi_use_signature_carries_expiry_and_bucket() {
        let plain = decode_plaintext(&signer().sign_more("photos", 1_700_000_000));
        assert!(plain.starts_with("a=100042&k=sid&e=1700000000&t="));
        assert!(plain.ends_with("&f=&b=photos"));
    }

    #[test]
    fn single_use_signature_binds_resource_and_zero_expiry() {
        let plain = decode_plaintext(&signer().sign_once("photos", "/100042/photos/a.txt"));
        assert!(plain.contains("&e=0&"));
        assert!(plain.ends_with("&f=/100042/photos/a.txt&b=photos"));
    }

    #[test]
    fn canonical_string_is_independent_of_the_secret_key() {
        let a = decode_plaintext(&signer().sign_more("photos", 1));
        let other = Signer::new(Credentials::new("100042", "sid", "other-key"));
        let b = decode_plaintext(&other.sign_more("photos", 1));
        // Only the keyed digest differs; the canonical prefix is stable.
        assert_eq!(a.split("&t=").next(), b.split("&t=").next());
    }
}
