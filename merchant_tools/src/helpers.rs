use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs the exact request body with the merchant's API key. Merchants recompute this over the raw body they receive.
pub fn sign_payload(api_key: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(api_key.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::default(),
    };
    mac.update(body);
    base64::encode(mac.finalize().into_bytes())
}
