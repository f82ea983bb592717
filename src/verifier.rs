//! EIP-191 signature verification
//!
//! Rebuilds the login message a wallet was asked to sign, recovers the
//! secp256k1 signer from a `personal_sign` signature and checks it against
//! the claimed address. Everything here is pure and needs no locking.

use alloy_primitives::{Signature, U256};

use crate::error::{AuthError, AuthResult};
use crate::types::WalletAddress;

/// r || s || v
pub const SIGNATURE_LEN: usize = 65;

/// secp256k1 group order n, big-endian
pub const SECP256K1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// Canonical login message
///
/// Byte layout (UTF-8, `\n` separated):
///
/// ```text
/// {domain} agent login
///
/// Address: {address, lower-case 0x hex}
/// Nonce: {nonce}
/// ```
pub fn login_message(domain: &str, address: &WalletAddress, nonce: &str) -> String {
    format!("{domain} agent login\n\nAddress: {address}\nNonce: {nonce}")
}

/// Decode a 0x-prefixed (or bare) hex signature
pub fn parse_signature(signature: &str) -> AuthResult<[u8; SIGNATURE_LEN]> {
    let digits = signature.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);

    if digits.len() != SIGNATURE_LEN * 2 {
        return Err(AuthError::MalformedSignature);
    }

    let mut bytes = [0u8; SIGNATURE_LEN];
    hex::decode_to_slice(digits, &mut bytes).map_err(|_| AuthError::MalformedSignature)?;
    Ok(bytes)
}

/// Recover the address that produced `signature` over `message`
pub fn recover_address(
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> AuthResult<WalletAddress> {
    let y_parity = match signature[64] {
        0 | 27 => false,
        1 | 28 => true,
        _ => return Err(AuthError::RecoveryFailed),
    };

    let order = U256::from_be_bytes(SECP256K1_ORDER);
    let r = U256::from_be_slice(&signature[..32]);
    let s = U256::from_be_slice(&signature[32..64]);
    if r.is_zero() || s.is_zero() || r >= order || s >= order {
        return Err(AuthError::RecoveryFailed);
    }

    // Wallets may emit high-s; (r, n - s) recovers with the opposite y parity
    let mut sig = Signature::new(r, s, y_parity);
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
    }

    let address = sig
        .recover_address_from_msg(message)
        .map_err(|_| AuthError::RecoveryFailed)?;
    Ok(address.into())
}

/// Checks a login signature for a claimed address and nonce
pub trait LoginVerifier: Send + Sync {
    fn verify(&self, claimed_address: &WalletAddress, nonce: &str, signature: &str)
        -> AuthResult<()>;
}

/// Verifies login signatures for one domain
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    domain: String,
}

impl SignatureVerifier {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl LoginVerifier for SignatureVerifier {
    /// Check that `signature` over the login message for `nonce` was made
    /// by `claimed_address`
    fn verify(
        &self,
        claimed_address: &WalletAddress,
        nonce: &str,
        signature: &str,
    ) -> AuthResult<()> {
        let signature = parse_signature(signature)?;
        let message = login_message(&self.domain, claimed_address, nonce);
        let recovered = recover_address(message.as_bytes(), &signature)?;

        if recovered != *claimed_address {
            return Err(AuthError::AddressMismatch);
        }
        Ok(())
    }
}
