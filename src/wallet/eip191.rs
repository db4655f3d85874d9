//! EIP-191 `personal_sign` hashing, signing, and signer recovery.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::wallet::{decode_hex_prefixed, encode_hex_lower};

/// Whether `signature` has the shape of a 65-byte `0x`-prefixed hex signature.
pub fn is_signature_like(signature: &str) -> bool {
    let s = signature.trim();
    let Some(hex) = s.strip_prefix("0x") else {
        return false;
    };
    hex.len() == 130 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Keccak-256 of the EIP-191 prefixed message.
pub fn personal_sign_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Sign `message` the way a browser wallet's `personal_sign` does.
///
/// Returns a `0x`-prefixed `r || s || v` signature with `v` in `{27, 28}`.
pub fn sign_personal_message(key: &SigningKey, message: &str) -> Result<String, String> {
    let prehash = personal_sign_hash(message);
    let (sig, recid) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| format!("failed signing message: {e}"))?;
    let mut sig_bytes = sig.to_bytes().to_vec();
    sig_bytes.push(recid.to_byte() + 27);
    Ok(format!("0x{}", encode_hex_lower(&sig_bytes)))
}

/// Recover the lowercase address that produced `signature_hex` over `message`.
pub fn recover_signer(message: &str, signature_hex: &str) -> Result<String, String> {
    let signature_bytes = decode_hex_prefixed(signature_hex)?;
    if signature_bytes.len() != 65 {
        return Err("signature must decode to 65 bytes".to_string());
    }

    let sig = EcdsaSignature::try_from(&signature_bytes[..64])
        .map_err(|e| format!("invalid ECDSA signature bytes: {e}"))?;
    let recovery_id = normalize_recovery_id(signature_bytes[64])?;
    let prehash = personal_sign_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| format!("failed recovering signer from signature: {e}"))?;
    address_from_verifying_key(&verifying_key)
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, String> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => return Err("signature recovery id must be 0/1 or 27/28".to_string()),
    };
    RecoveryId::try_from(id).map_err(|_| "signature recovery id is invalid".to_string())
}

/// Ethereum address (`0x` + last 20 bytes of keccak(pubkey)) for a public key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> Result<String, String> {
    let encoded = key.to_encoded_point(false);
    let pubkey = encoded.as_bytes();
    if pubkey.len() != 65 || pubkey[0] != 0x04 {
        return Err("unexpected public key format".to_string());
    }

    let mut hasher = Keccak256::new();
    hasher.update(&pubkey[1..]);
    let digest = hasher.finalize();
    Ok(format!("0x{}", encode_hex_lower(&digest[12..])))
}
