//! Random credential generation.
//!
//! All randomness is drawn from the operating system CSPRNG through
//! [`OsRng`]. Entropy failures are reported as [`AuthError::Generation`];
//! nothing here falls back to a weaker source or panics.
//!
//! Every call fills its own buffer, so the functions are safe to call from
//! any number of tasks at once.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::{AuthError, AuthResult};

/// Byte length of generated opaque tokens (256 bits).
pub const TOKEN_BYTE_LENGTH: usize = 32;

/// Largest supported verification code length.
///
/// `10^18 - 1` still leaves enough headroom in a `u64` for unbiased
/// rejection sampling.
pub const MAX_CODE_DIGITS: usize = 18;

/// Generates an unguessable opaque token.
///
/// Draws `byte_length` random bytes and encodes them as unpadded base64url,
/// so 32 bytes become a 43 character token.
///
/// # Errors
///
/// Returns `InvalidRequest` for a zero length and `Generation` if the OS
/// entropy source fails.
pub fn generate_opaque_token(byte_length: usize) -> AuthResult<String> {
    if byte_length == 0 {
        return Err(AuthError::invalid_request(
            "token byte length must be > 0",
        ));
    }

    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::generation(format!("entropy source failed: {e}")))?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generates a numeric code of exactly `digit_length` digits.
///
/// The value is uniform over `[10^(d-1), 10^d - 1]`, so the code never has a
/// leading zero (a one digit code is in `1..=9`).
///
/// # Errors
///
/// Returns `InvalidRequest` if `digit_length` is outside
/// `1..=MAX_CODE_DIGITS` and `Generation` if the OS entropy source fails.
pub fn generate_numeric_code(digit_length: usize) -> AuthResult<String> {
    if digit_length == 0 || digit_length > MAX_CODE_DIGITS {
        return Err(AuthError::invalid_request(format!(
            "verification code length must be between 1 and {MAX_CODE_DIGITS}, got {digit_length}"
        )));
    }

    // digit_length <= 18, so these fit comfortably in a u64
    let exponent = digit_length as u32;
    let min = 10u64.pow(exponent - 1);
    let max = 10u64.pow(exponent) - 1;
    let value = uniform_in_range(min, max)?;

    Ok(format!("{value:0width$}", width = digit_length))
}

/// Draws a uniform integer in `[min, max]` by rejection sampling.
fn uniform_in_range(min: u64, max: u64) -> AuthResult<u64> {
    let span = max - min + 1;
    // Largest multiple of `span` that fits in a u64; draws at or above it
    // would bias the low residues.
    let zone = u64::MAX - (u64::MAX % span);

    loop {
        let mut buf = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| AuthError::generation(format!("entropy source failed: {e}")))?;
        let draw = u64::from_le_bytes(buf);
        if draw < zone {
            return Ok(min + draw % span);
        }
    }
}
