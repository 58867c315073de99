use alloy_consensus::{SignableTransaction as _, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718 as _;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_signer::SignerSync as _;

use crate::accounts::Account;

/// Gas consumed by a plain value transfer between externally owned accounts.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// A replay-protected legacy transfer ready for `eth_sendRawTransaction`.
#[derive(Clone, Debug)]
pub struct SignedTransfer {
    pub hash: B256,
    pub raw: Bytes,
}

pub fn sign_transfer(
    from: &Account,
    to: Address,
    value: U256,
    nonce: u64,
    gas_price: u128,
    chain_id: u64,
) -> Result<SignedTransfer, alloy_signer::Error> {
    let tx = TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price,
        gas_limit: TRANSFER_GAS_LIMIT,
        to: TxKind::Call(to),
        value,
        input: Bytes::new(),
    };

    let signature = from.signer().sign_hash_sync(&tx.signature_hash())?;
    let signed = tx.into_signed(signature);
    let hash = *signed.hash();
    let raw: Bytes = TxEnvelope::from(signed).encoded_2718().into();

    Ok(SignedTransfer { hash, raw })
}

/// Upper bound on the fee paid by one transfer at `gas_price`.
#[must_use]
pub fn transfer_gas_cost(gas_price: u128) -> U256 {
    U256::from(gas_price) * U256::from(TRANSFER_GAS_LIMIT)
}
