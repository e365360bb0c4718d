// SPDX-License-Identifier: CC0-1.0

//! PSBT integration
//!
//! Populates a PSBT input from a descriptor and a previous transaction,
//! and finalizes inputs once signatures are in. Finalization dispatches on
//! the payment shape: key-only shapes build their unlocking data directly,
//! miniscript shapes go through the satisfier and have their push-only
//! satisfaction converted into the witness stack or scriptSig.

use std::convert::TryFrom;

use bitcoin::blockdata::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::hex::FromHex;
use bitcoin::psbt::Input;
use bitcoin::{
    absolute, OutPoint, Psbt, PubkeyHash, PublicKey, ScriptBuf, Sequence, Transaction, TxIn,
    WPubkeyHash, Witness,
};

use crate::descriptor::payment::{p2wpkh_script, Payment};
use crate::descriptor::Descriptor;
use crate::engine::MiniscriptEngine;
use crate::miniscript::satisfy::PartialSig;
use crate::Error;

pub(crate) fn update<E: MiniscriptEngine>(
    descriptor: &Descriptor<E>,
    tx_hex: &str,
    vout: u32,
    psbt: &mut Psbt,
) -> Result<usize, Error> {
    let bytes =
        Vec::<u8>::from_hex(tx_hex).map_err(|e| Error::Transaction(e.to_string()))?;
    let tx: Transaction =
        encode::deserialize(&bytes).map_err(|e| Error::Transaction(e.to_string()))?;
    let txid = tx.compute_txid();
    let utxo = tx
        .output
        .get(vout as usize)
        .cloned()
        .ok_or(Error::NoSuchOutput(vout))?;

    if let Some(lock_time) = descriptor.lock_time() {
        // Signatures committed to this locktime; a PSBT already pinned to
        // another one cannot take this input.
        if psbt.unsigned_tx.lock_time != absolute::LockTime::ZERO {
            return Err(Error::LocktimeConflict);
        }
        psbt.unsigned_tx.lock_time = lock_time;
    }

    let sequence = match descriptor.sequence() {
        Some(sequence) => sequence,
        // Keep OP_CHECKLOCKTIMEVERIFY enabled when a locktime is required.
        None if descriptor.lock_time().is_some() => Sequence::ENABLE_LOCKTIME_NO_RBF,
        None => Sequence::MAX,
    };

    let mut input = Input {
        non_witness_utxo: Some(tx),
        ..Default::default()
    };
    for (_, _, key) in descriptor.expansion_map().iter() {
        if let Some((pubkey, source)) = key.bip32_derivation() {
            input.bip32_derivation.insert(pubkey, source);
        }
    }
    let script_pubkey = descriptor.script_pubkey();
    if descriptor.payment().is_segwit() || script_pubkey.witness_version().is_some() {
        input.witness_utxo = Some(utxo);
    }
    if let Some(witness_script) = descriptor.witness_script() {
        input.witness_script = Some(witness_script.clone());
    }

    psbt.unsigned_tx.input.push(TxIn {
        previous_output: OutPoint { txid, vout },
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::default(),
    });
    psbt.inputs.push(input);
    Ok(psbt.inputs.len() - 1)
}

pub(crate) fn finalize_input<E: MiniscriptEngine>(
    descriptor: &Descriptor<E>,
    index: usize,
    psbt: &mut Psbt,
) -> Result<(), Error> {
    let signatures: Vec<PartialSig> = psbt.inputs[index]
        .partial_sigs
        .iter()
        .map(|(pubkey, sig)| PartialSig {
            pubkey: *pubkey,
            signature: sig.serialize().to_vec(),
        })
        .collect();
    if signatures.is_empty() {
        return Err(Error::NoSignatures);
    }

    let (final_script_sig, final_script_witness) = match *descriptor.payment() {
        Payment::P2pk { pubkey } => {
            let sig = find_signature(&signatures, |candidate| *candidate == pubkey)?;
            (Some(push_only(&[&sig.signature])), None)
        }
        Payment::P2pkh { hash } => {
            let sig = find_signature(&signatures, |candidate| candidate.pubkey_hash() == hash)?;
            (
                Some(push_only(&[&sig.signature, &sig.pubkey.to_bytes()])),
                None,
            )
        }
        Payment::P2wpkh { hash } => {
            let sig = find_signature(&signatures, |candidate| wpkh(candidate) == hash)?;
            (None, Some(key_spend_witness(sig)))
        }
        Payment::P2shWpkh { hash } => {
            let sig = find_signature(&signatures, |candidate| wpkh(candidate) == hash)?;
            let redeem = p2wpkh_script(&hash);
            (
                Some(push_only(&[redeem.as_bytes()])),
                Some(key_spend_witness(sig)),
            )
        }
        Payment::P2sh { .. } => {
            let satisfaction = descriptor.script_satisfaction(&signatures)?;
            let redeem = descriptor.redeem_script().ok_or(Error::Unresolvable)?;
            let mut bytes = satisfaction;
            bytes.extend_from_slice(push_only(&[redeem.as_bytes()]).as_bytes());
            (Some(ScriptBuf::from_bytes(bytes)), None)
        }
        Payment::P2wsh { .. } | Payment::P2shWsh { .. } => {
            let witness_script = descriptor.witness_script().ok_or(Error::Unresolvable)?;
            let satisfaction = descriptor.script_satisfaction(&signatures)?;
            let mut witness = Witness::new();
            for item in satisfaction_stack(&satisfaction)? {
                witness.push(item);
            }
            witness.push(witness_script.as_bytes());

            let script_sig = match *descriptor.payment() {
                Payment::P2shWsh { .. } => {
                    let redeem = descriptor.redeem_script().expect("sh-wrapped shape");
                    Some(push_only(&[redeem.as_bytes()]))
                }
                _ => None,
            };
            (script_sig, Some(witness))
        }
        Payment::P2tr { .. } => return Err(Error::Unresolvable),
    };

    let input = &mut psbt.inputs[index];
    input.final_script_sig = final_script_sig;
    input.final_script_witness = final_script_witness;
    // Finalized inputs drop the data the final scripts supersede.
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.ripemd160_preimages.clear();
    input.sha256_preimages.clear();
    input.hash160_preimages.clear();
    input.hash256_preimages.clear();
    input.tap_key_sig = None;
    input.tap_script_sigs.clear();
    input.tap_scripts.clear();
    input.tap_key_origins.clear();
    input.tap_internal_key = None;
    input.tap_merkle_root = None;

    Ok(())
}

fn find_signature<'s>(
    signatures: &'s [PartialSig],
    matches: impl Fn(&PublicKey) -> bool,
) -> Result<&'s PartialSig, Error> {
    signatures
        .iter()
        .find(|sig| matches(&sig.pubkey))
        .ok_or(Error::NoSignatures)
}

fn wpkh(pubkey: &PublicKey) -> WPubkeyHash {
    WPubkeyHash::from_byte_array(PubkeyHash::hash(&pubkey.to_bytes()).to_byte_array())
}

fn key_spend_witness(sig: &PartialSig) -> Witness {
    let mut witness = Witness::new();
    witness.push(&sig.signature);
    witness.push(sig.pubkey.to_bytes());
    witness
}

/// A scriptSig consisting of the given pushes.
fn push_only(items: &[&[u8]]) -> ScriptBuf {
    let mut builder = Builder::new();
    for item in items {
        let push =
            PushBytesBuf::try_from(item.to_vec()).expect("script elements stay below push limits");
        builder = builder.push_slice(push);
    }
    builder.into_script()
}

/// Break a push-only satisfaction script into witness stack items.
fn satisfaction_stack(satisfaction: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let script = ScriptBuf::from_bytes(satisfaction.to_vec());
    let mut items = Vec::new();
    for instruction in script.instructions() {
        match instruction? {
            Instruction::PushBytes(push) => items.push(push.as_bytes().to_vec()),
            Instruction::Op(op) => {
                let opcode = op.to_u8();
                if (0x51..=0x60).contains(&opcode) {
                    // OP_1..OP_16 become their minimally-encoded number.
                    items.push(vec![opcode - 0x50]);
                } else if opcode == 0x4f {
                    // OP_1NEGATE
                    items.push(vec![0x81]);
                } else {
                    return Err(Error::Engine(
                        "satisfaction contains non-push data".to_owned(),
                    ));
                }
            }
        }
    }
    Ok(items)
}
