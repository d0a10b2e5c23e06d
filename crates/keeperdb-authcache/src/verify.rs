//! Password challenge-response verification
//!
//! The upstream catalog stores `SHA1(SHA1(password))` as a hex string. The
//! client proves knowledge of the password by sending
//!
//! ```text
//! XOR( SHA1(password), SHA1( scramble + SHA1(SHA1(password)) ) )
//! ```
//!
//! Since we know the scramble and the stored digest, XOR-ing the client token
//! with `SHA1(scramble + stored)` recovers `SHA1(password)`; hashing that
//! once more and comparing against the stored digest verifies the password.
//! The recovered `SHA1(password)` doubles as the pass-through credential used
//! to re-authenticate downstream on the client's behalf without ever seeing
//! the plaintext.

use rand::Rng;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of the SHA1 digest this protocol is built around.
pub const DIGEST_LEN: usize = 20;

/// The recovered `SHA1(password)`, forwarded when authenticating downstream.
/// Zeroized on drop; all zeroes for passwordless accounts.
pub type PassThrough = Zeroizing<[u8; DIGEST_LEN]>;

/// Generate a random 20-byte scramble for a client handshake.
///
/// NUL and 0xFF bytes are avoided (reserved in the wire protocol).
pub fn generate_scramble() -> [u8; DIGEST_LEN] {
    let mut rng = rand::thread_rng();
    let mut scramble = [0u8; DIGEST_LEN];

    for byte in scramble.iter_mut() {
        *byte = loop {
            let b: u8 = rng.gen();
            if b != 0 && b != 0xFF {
                break b;
            }
        };
    }

    scramble
}

/// Compute the client-side token for a password and scramble.
///
/// Used by tests and by proxy code re-authenticating against a downstream
/// server. Empty passwords produce an empty token.
pub fn compute_token(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);
    let stage3 = sha1_concat(scramble, &stage2);

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// The stored form of a password: hex-encoded `SHA1(SHA1(password))`.
pub fn double_sha1_hex(password: &str) -> String {
    hex::encode(sha1(&sha1(password.as_bytes())))
}

/// Verify a client token against the stored hex digest.
///
/// Returns the pass-through credential on success, `None` on rejection. All
/// length mismatches are rejections, never errors. An empty stored digest is
/// a passwordless account: the check is skipped and an empty token accepted.
pub fn verify_token(stored_hex: &str, token: &[u8], scramble: &[u8]) -> Option<PassThrough> {
    // SQL PASSWORD() output carries a leading '*'.
    let stored_hex = stored_hex.strip_prefix('*').unwrap_or(stored_hex);

    if stored_hex.is_empty() {
        return if token.is_empty() {
            Some(Zeroizing::new([0u8; DIGEST_LEN]))
        } else {
            None
        };
    }

    let stored = match hex::decode(stored_hex) {
        Ok(bytes) if bytes.len() == DIGEST_LEN => bytes,
        _ => {
            debug!("Stored credential is not a {}-byte digest", DIGEST_LEN);
            return None;
        }
    };

    if token.len() != DIGEST_LEN {
        return None;
    }

    // step1 = SHA1(scramble + stored); step2 = token XOR step1 recovers
    // SHA1(password); accept iff SHA1(step2) equals the stored digest.
    let step1 = sha1_concat(scramble, &stored);

    let mut step2 = Zeroizing::new([0u8; DIGEST_LEN]);
    for (out, (t, s)) in step2.iter_mut().zip(token.iter().zip(step1.iter())) {
        *out = t ^ s;
    }

    let check = sha1(&step2[..]);

    if bool::from(check.as_slice().ct_eq(&stored)) {
        Some(step2)
    } else {
        None
    }
}

fn sha1(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn sha1_concat(first: &[u8], second: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}
