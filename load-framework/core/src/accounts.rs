use std::fmt;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("no private key configured for the main account")]
    MissingKey,
    #[error("private key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("private key is not a valid secp256k1 scalar: {0}")]
    InvalidKey(String),
}

/// A signing identity on the target network.
#[derive(Clone)]
pub struct Account {
    signer: PrivateKeySigner,
}

impl Account {
    /// Generates a fresh random identity. Used for ephemeral pool accounts.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Loads an identity from a hex encoded private key, with or without the
    /// `0x` prefix.
    pub fn from_secret(secret: &str) -> Result<Self, AccountError> {
        let trimmed = secret.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if raw.is_empty() {
            return Err(AccountError::MissingKey);
        }

        let bytes = hex::decode(raw)?;
        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|err| AccountError::InvalidKey(err.to_string()))?;
        Ok(Self { signer })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    #[must_use]
    pub const fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl From<PrivateKeySigner> for Account {
    fn from(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
