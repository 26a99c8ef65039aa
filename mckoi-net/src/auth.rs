// Every wire message bears a 32-byte authentication tag: HMAC-SHA-256 over
// the payload using the cluster's shared `network_password`. This is a
// secret-HMAC handshake, not TLS (spec §6.2): connections that fail to
// produce a matching tag are dropped as a `Network` authentication failure.

use hmac::{Hmac, Mac};
use mckoi_base::{err_kind, ErrorKind, Result};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TAG_LEN: usize = 32;

pub fn compute_tag(secret: &[u8], payload: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    let mut out = [0_u8; TAG_LEN];
    out.copy_from_slice(&bytes);
    out
}

pub fn verify_tag(secret: &[u8], payload: &[u8], tag: &[u8]) -> Result<()> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(tag).map_err(|_| {
        err_kind(ErrorKind::Network, "authentication tag mismatch: wrong network_password?")
    })
}
