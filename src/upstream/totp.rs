use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{GatewayError, GatewayResult};

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// RFC 6238 code for a base32 shared secret, 6 digits on a 30s step, the
/// parameters the upstream's two-factor challenge expects.
pub fn totp_code(secret_base32: &str, now_secs: u64) -> GatewayResult<String> {
    let normalized: String = secret_base32
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let key = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| GatewayError::InvalidInput(format!("invalid TOTP secret: {e}")))?;

    let counter = now_secs / STEP_SECS;
    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid TOTP key length: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{code:06}"))
}
