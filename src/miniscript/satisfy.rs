// SPDX-License-Identifier: CC0-1.0

//! Satisfactions
//!
//! Builds the *knowns* table out of signatures and hash preimages, asks
//! the engine for non-malleable solutions, picks one (optionally pinned to
//! the `(nLockTime, nSequence)` the descriptor committed to) and
//! materializes it into script satisfaction bytes.
//!
//! The satisfier works under the usual Miniscript threat model: the
//! attacker holds none of the participating private keys and knows no
//! preimage an honest participant does not know. Only non-malleable
//! solutions are ever considered.

use std::collections::BTreeMap;

use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::{absolute, PublicKey, Sequence};

use crate::engine::MiniscriptEngine;
use crate::miniscript::script::{script_from_asm, substitute_keys};
use crate::miniscript::ExpansionMap;
use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A known hash preimage.
///
/// The digest is a textual hash call such as `sha256(<64 hex chars>)`;
/// accepted functions are `sha256`, `hash256` (64-char digests) and
/// `ripemd160`, `hash160` (40-char digests). Preimages are always 32
/// bytes. Both the digest argument and the preimage are validated and
/// lowercased on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Preimage {
    digest: String,
    preimage: Vec<u8>,
}

impl Preimage {
    /// Build a preimage from its digest call and 32-byte preimage hex.
    pub fn new(digest: &str, preimage_hex: &str) -> Result<Preimage, Error> {
        let digest = digest.to_lowercase();
        let (function, rest) = digest
            .split_once('(')
            .ok_or_else(|| Error::InvalidPreimage(format!("malformed digest '{}'", digest)))?;
        let arg = rest
            .strip_suffix(')')
            .ok_or_else(|| Error::InvalidPreimage(format!("malformed digest '{}'", digest)))?;
        let digest_len = match function {
            "sha256" | "hash256" => 64,
            "ripemd160" | "hash160" => 40,
            _ => {
                return Err(Error::InvalidPreimage(format!(
                    "unknown hash function '{}'",
                    function
                )))
            }
        };
        if arg.len() != digest_len || !arg.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidPreimage(format!(
                "digest of '{}' must be {} hex characters",
                function, digest_len
            )));
        }
        let preimage = Vec::<u8>::from_hex(&preimage_hex.to_lowercase())
            .map_err(|_| Error::InvalidPreimage("preimage is not hex".to_owned()))?;
        if preimage.len() != 32 {
            return Err(Error::InvalidPreimage(format!(
                "preimage must be 32 bytes, got {}",
                preimage.len()
            )));
        }
        Ok(Preimage { digest, preimage })
    }

    /// The digest call, e.g. `sha256(50863a...)`.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The 32-byte preimage.
    pub fn preimage(&self) -> &[u8] {
        &self.preimage
    }

    /// The satisfaction token for this preimage, e.g.
    /// `<sha256_preimage(50863a...)>`.
    pub(crate) fn known_token(&self) -> String {
        format!("<{}>", self.digest.replacen('(', "_preimage(", 1))
    }

    fn value_token(&self) -> String {
        format!("<{}>", self.preimage.to_lower_hex_string())
    }
}

/// A signature over one of the descriptor's public keys.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartialSig {
    /// The signing public key.
    pub pubkey: PublicKey,
    /// DER-encoded ECDSA signature followed by the sighash flag byte.
    pub signature: Vec<u8>,
}

/// A materialized satisfaction and the consensus fields it is valid under.
///
/// Once produced for a set of signatures, re-running the satisfier with
/// any superset of known material and the same `(lock_time, sequence)`
/// still yields a valid satisfaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Satisfaction {
    /// Unlocking data, serialized as a push-only script.
    pub script_satisfaction: Vec<u8>,
    /// `nLockTime` the spending transaction must set, if any.
    pub lock_time: Option<absolute::LockTime>,
    /// `nSequence` the spending input must set, if any.
    pub sequence: Option<Sequence>,
}

/// Search the satisfier's non-malleable solutions for the known material
/// and materialize one.
///
/// Without `constraints` the first (cheapest) solution wins. With
/// `constraints` the solution must reproduce the exact
/// `(nLockTime, nSequence)` pair: signatures commit to those fields, so
/// a different branch would invalidate them.
pub(crate) fn satisfy<E: MiniscriptEngine>(
    engine: &E,
    expanded_miniscript: &str,
    map: &ExpansionMap,
    signatures: &[PartialSig],
    preimages: &[Preimage],
    constraints: Option<(Option<absolute::LockTime>, Option<Sequence>)>,
) -> Result<Satisfaction, Error> {
    let mut knowns = BTreeMap::new();
    for preimage in preimages {
        knowns.insert(preimage.known_token(), preimage.value_token());
    }
    for sig in signatures {
        // A signature by a key that does not participate in this
        // miniscript cannot help satisfy it.
        if let Some(k) = map.index_of_pubkey(&sig.pubkey) {
            knowns.insert(
                format!("<sig(@{})>", k),
                format!("<{}>", sig.signature.to_lower_hex_string()),
            );
        }
    }

    let solutions = engine.satisfy(expanded_miniscript, &knowns.keys().cloned().collect())?;
    if solutions.is_empty() {
        return Err(Error::Unresolvable);
    }

    let solution = match constraints {
        None => &solutions[0],
        Some((lock_time, sequence)) => solutions
            .iter()
            .find(|s| s.lock_time == lock_time && s.sequence == sequence)
            .ok_or(Error::ConstraintsUnmet)?,
    };

    let mut asm = solution.asm.clone();
    for (token, value) in &knowns {
        asm = asm.replace(token, value);
    }
    let asm = substitute_keys(&asm, map);
    let script = script_from_asm(&asm)?;

    Ok(Satisfaction {
        script_satisfaction: script.into_bytes(),
        lock_time: solution.lock_time,
        sequence: solution.sequence,
    })
}

/// Probe the spending constraints of a miniscript by satisfying it with
/// synthetic 64-byte zero signatures for the assumed signer set.
pub(crate) fn spending_constraints<E: MiniscriptEngine>(
    engine: &E,
    expanded_miniscript: &str,
    map: &ExpansionMap,
    signers: &[PublicKey],
    preimages: &[Preimage],
) -> Result<(Option<absolute::LockTime>, Option<Sequence>), Error> {
    let fake_signatures: Vec<PartialSig> = signers
        .iter()
        .map(|pubkey| PartialSig {
            pubkey: *pubkey,
            signature: vec![0u8; 64],
        })
        .collect();
    let satisfaction = satisfy(
        engine,
        expanded_miniscript,
        map,
        &fake_signatures,
        preimages,
        None,
    )?;
    Ok((satisfaction.lock_time, satisfaction.sequence))
}
