// SPDX-License-Identifier: CC0-1.0

//! Payment shapes
//!
//! The tagged type a descriptor resolves to. Each variant carries the data
//! its output script template needs; the inner scripts of wrapped shapes
//! (the witness script of `wsh`, the redeem script of bare `sh`) live on
//! the descriptor, which also knows whether they are available at all
//! (they are not for `addr(...)` descriptors).

use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::{
    Address, Network, PublicKey, PubkeyHash, ScriptBuf, ScriptHash, WPubkeyHash, WScriptHash,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// The payment structure of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Payment {
    /// `pk(KEY)`: raw public key output. Has no address form.
    P2pk {
        /// The key the output pays to.
        pubkey: PublicKey,
    },
    /// Legacy pay-to-pubkey-hash.
    P2pkh {
        /// HASH160 of the public key.
        hash: PubkeyHash,
    },
    /// Native segwit v0 pay-to-witness-pubkey-hash.
    P2wpkh {
        /// HASH160 of the compressed public key.
        hash: WPubkeyHash,
    },
    /// Bare pay-to-script-hash.
    P2sh {
        /// HASH160 of the redeem script.
        hash: ScriptHash,
    },
    /// Native segwit v0 pay-to-witness-script-hash.
    P2wsh {
        /// SHA256 of the witness script.
        hash: WScriptHash,
    },
    /// `sh(wpkh(KEY))`: nested segwit key spend.
    P2shWpkh {
        /// HASH160 of the compressed public key.
        hash: WPubkeyHash,
    },
    /// `sh(wsh(MS))`: nested segwit script spend.
    P2shWsh {
        /// SHA256 of the witness script.
        hash: WScriptHash,
    },
    /// Taproot output, recognized from an address literal only.
    P2tr {
        /// The witness v1 output script.
        output_script: ScriptBuf,
    },
}

impl Payment {
    /// The output script of this payment.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match *self {
            Payment::P2pk { ref pubkey } => Builder::new()
                .push_key(pubkey)
                .push_opcode(opcodes::OP_CHECKSIG)
                .into_script(),
            Payment::P2pkh { ref hash } => p2pkh_script(hash),
            Payment::P2wpkh { ref hash } => p2wpkh_script(hash),
            Payment::P2sh { ref hash } => p2sh_script(hash),
            Payment::P2wsh { ref hash } => p2wsh_script(hash),
            Payment::P2shWpkh { ref hash } => {
                p2sh_script(&ScriptHash::hash(p2wpkh_script(hash).as_bytes()))
            }
            Payment::P2shWsh { ref hash } => {
                p2sh_script(&ScriptHash::hash(p2wsh_script(hash).as_bytes()))
            }
            Payment::P2tr { ref output_script } => output_script.clone(),
        }
    }

    /// The address of this payment on `network`; `pk(...)` outputs have
    /// none.
    pub fn address(&self, network: Network) -> Result<Address, Error> {
        if let Payment::P2pk { .. } = *self {
            return Err(Error::NoAddress);
        }
        Address::from_script(&self.script_pubkey(), network).map_err(|_| Error::NoAddress)
    }

    /// Whether spending this payment puts data on the witness stack.
    pub(crate) fn is_segwit(&self) -> bool {
        matches!(
            *self,
            Payment::P2wpkh { .. }
                | Payment::P2wsh { .. }
                | Payment::P2shWpkh { .. }
                | Payment::P2shWsh { .. }
        )
    }

    /// Classify a decoded address into its payment shape.
    pub(crate) fn classify_address(address: &Address, source: &str) -> Result<Payment, Error> {
        let spk = address.script_pubkey();
        let bytes = spk.as_bytes();
        if spk.is_p2pkh() {
            let hash = PubkeyHash::from_slice(&bytes[3..23]).expect("p2pkh template");
            Ok(Payment::P2pkh { hash })
        } else if spk.is_p2sh() {
            let hash = ScriptHash::from_slice(&bytes[2..22]).expect("p2sh template");
            Ok(Payment::P2sh { hash })
        } else if spk.is_p2wpkh() {
            let hash = WPubkeyHash::from_slice(&bytes[2..22]).expect("p2wpkh template");
            Ok(Payment::P2wpkh { hash })
        } else if spk.is_p2wsh() {
            let hash = WScriptHash::from_slice(&bytes[2..34]).expect("p2wsh template");
            Ok(Payment::P2wsh { hash })
        } else if spk.is_p2tr() {
            Ok(Payment::P2tr { output_script: spk })
        } else {
            Err(Error::InvalidAddress(source.to_owned()))
        }
    }
}

pub(crate) fn p2pkh_script(hash: &PubkeyHash) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_DUP)
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(hash.to_byte_array())
        .push_opcode(opcodes::OP_EQUALVERIFY)
        .push_opcode(opcodes::OP_CHECKSIG)
        .into_script()
}

pub(crate) fn p2sh_script(hash: &ScriptHash) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(hash.to_byte_array())
        .push_opcode(opcodes::OP_EQUAL)
        .into_script()
}

pub(crate) fn p2wpkh_script(hash: &WPubkeyHash) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_PUSHBYTES_0)
        .push_slice(hash.to_byte_array())
        .into_script()
}

pub(crate) fn p2wsh_script(hash: &WScriptHash) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_PUSHBYTES_0)
        .push_slice(hash.to_byte_array())
        .into_script()
}
