use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};

use crate::error::WalletError;
use crate::wallet::{KeyIdentityProvider, WalletSignature, decode_hex_prefixed, eip191};

/// In-process wallet backed by a secp256k1 private key.
///
/// Stands in for a browser wallet in the CLI and in tests. It never prompts,
/// so it only fails when asked to sign for an address it does not hold.
pub struct LocalKeySigner {
    key: SigningKey,
    address: String,
}

impl LocalKeySigner {
    pub fn from_private_key(private_key: &SecretString) -> Result<Self, WalletError> {
        let bytes = decode_hex_prefixed(private_key.expose_secret())
            .map_err(|e| WalletError::Other(format!("invalid private key: {e}")))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| WalletError::Other(format!("invalid private key: {e}")))?;
        let address = eip191::address_from_verifying_key(key.verifying_key())
            .map_err(WalletError::Other)?;
        Ok(Self { key, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyIdentityProvider for LocalKeySigner {
    async fn active_address(&self) -> Result<String, WalletError> {
        Ok(self.address.clone())
    }

    async fn sign_message(
        &self,
        address: &str,
        message: &str,
    ) -> Result<WalletSignature, WalletError> {
        if !address.eq_ignore_ascii_case(&self.address) {
            return Err(WalletError::Other(format!("no key held for address {address}")));
        }
        let signature =
            eip191::sign_personal_message(&self.key, message).map_err(WalletError::Other)?;
        Ok(WalletSignature {
            signer: self.address.clone(),
            signature,
        })
    }
}
