//! Wallet (key identity provider) boundary.
//!
//! The wallet holds a private key for a blockchain address and is treated as
//! an opaque capability: it can report the active address and sign a message
//! for an address. Both operations may suspend on user interaction and may
//! be declined.

pub mod eip191;
mod local;

use async_trait::async_trait;

use crate::error::WalletError;

pub use self::local::LocalKeySigner;

/// A signature produced by a wallet, together with the address the wallet
/// claims to have signed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSignature {
    pub signer: String,
    pub signature: String,
}

/// External wallet capability.
#[async_trait]
pub trait KeyIdentityProvider: Send + Sync {
    /// Address of the account currently selected in the wallet.
    async fn active_address(&self) -> Result<String, WalletError>;

    /// Sign `message` with the key for `address`.
    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<WalletSignature, WalletError>;
}

/// Provider for environments without a wallet. Every request fails with
/// [`WalletError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWallet;

#[async_trait]
impl KeyIdentityProvider for NoWallet {
    async fn active_address(&self) -> Result<String, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn sign_message(
        &self,
        _address: &str,
        _message: &str,
    ) -> Result<WalletSignature, WalletError> {
        Err(WalletError::Unavailable)
    }
}

/// Lowercase-normalize a `0x`-prefixed 40-hex address.
pub fn normalize_address(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if !(trimmed.starts_with("0x") || trimmed.starts_with("0X")) || trimmed.len() != 42 {
        return None;
    }
    let hex = &trimmed[2..];
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex.to_ascii_lowercase()))
}

pub(crate) fn decode_hex_prefixed(value: &str) -> Result<Vec<u8>, String> {
    let trimmed = value.trim();
    let Some(hex) = trimmed.strip_prefix("0x") else {
        return Err("hex string must be 0x-prefixed".to_string());
    };
    if hex.is_empty() {
        return Err("hex string is empty".to_string());
    }
    if !hex.len().is_multiple_of(2) {
        return Err("hex string must have an even number of characters".to_string());
    }

    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks_exact(2) {
        let hi = decode_hex_nibble(pair[0]).ok_or_else(|| "invalid hex character".to_string())?;
        let lo = decode_hex_nibble(pair[1]).ok_or_else(|| "invalid hex character".to_string())?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

pub(crate) fn encode_hex_lower(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}
