//! Session identifier generation.

use base64::Engine as _;
use rand::{rngs::OsRng, RngCore};

/// Bytes of randomness behind each session id.
const SID_BYTES: usize = 15;

/// Generate an unguessable session id.
///
/// 15 bytes of OS randomness, base64url-encoded to a 20-character
/// string with no padding.
///
/// # Panics
///
/// Panics if the operating system's random number generator fails.
#[must_use]
pub fn generate() -> String {
    let mut bytes = [0u8; SID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
