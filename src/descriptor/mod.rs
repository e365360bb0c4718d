// SPDX-License-Identifier: CC0-1.0

//! # Output Descriptors
//!
//! Recognition and construction of descriptors. A
//! [`DescriptorFactory`] holds the injected engine and the secp context;
//! its [`descriptor`](DescriptorFactory::descriptor) constructor isolates
//! the expression (checksum, wildcard substitution), dispatches on its
//! shape and produces an immutable [`Descriptor`].
//!
//! Recognized forms: `addr(ADDR)`, `pk(KEY)`, `pkh(KEY)`, `wpkh(KEY)`,
//! `sh(wpkh(KEY))`, `sh(wsh(MS))`, `wsh(MS)` and bare `sh(MS)`. Bare
//! `sh(...)` only accepts the classic script templates unless
//! [`DescriptorParams::allow_miniscript_in_p2sh`] is set, to discourage
//! malleable P2SH uses.

pub mod checksum;
pub mod key;
pub mod payment;

use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{
    absolute, Address, Network, Psbt, PublicKey, ScriptBuf, ScriptHash, Sequence, WPubkeyHash,
    WScriptHash,
};

use crate::descriptor::key::{parse_key_expression, KeyInfo};
use crate::descriptor::payment::{p2wpkh_script, p2wsh_script, Payment};
use crate::engine::MiniscriptEngine;
use crate::miniscript::satisfy::{self, PartialSig, Preimage};
use crate::miniscript::script::{
    count_non_push_ops, script_from_asm, substitute_keys, MAX_OPS_PER_SCRIPT,
    MAX_SCRIPT_ELEMENT_SIZE, MAX_STANDARD_P2WSH_SCRIPT_SIZE,
};
use crate::miniscript::{expand_miniscript, ExpansionMap};
use crate::{psbt as psbt_glue, Error};

/// Script templates accepted inside bare `sh(...)` without opting in to
/// arbitrary miniscript.
const P2SH_TEMPLATES: [&str; 8] = [
    "pk",
    "pkh",
    "wpkh",
    "combo",
    "multi",
    "sortedmulti",
    "multi_a",
    "sortedmulti_a",
];

/// Construction parameters for [`DescriptorFactory::descriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorParams {
    /// Derivation index substituted for every `*` of a ranged descriptor.
    /// All wildcards of one expression advance in lockstep.
    pub index: Option<u32>,
    /// Reject expressions without a trailing `#checksum`.
    pub checksum_required: bool,
    /// Accept arbitrary miniscript inside bare `sh(...)`.
    pub allow_miniscript_in_p2sh: bool,
    /// Network keys and addresses must belong to.
    pub network: Network,
    /// Hash preimages known to the spender.
    pub preimages: Vec<Preimage>,
    /// Key expressions of the signers expected to sign. When omitted,
    /// *every* key of the descriptor is assumed to sign, which may pick a
    /// spending branch no real signer set can fulfill; passing the actual
    /// signer set is strongly recommended.
    pub signers_key_expressions: Option<Vec<String>>,
    /// Only derive scripts and addresses: skip the satisfier probe that
    /// precomputes the spending constraints.
    pub address_only: bool,
}

impl DescriptorParams {
    /// Parameters with all options off.
    pub fn new(network: Network) -> Self {
        DescriptorParams {
            index: None,
            checksum_required: false,
            allow_miniscript_in_p2sh: false,
            network,
            preimages: Vec::new(),
            signers_key_expressions: None,
            address_only: false,
        }
    }

    /// Set the wildcard derivation index.
    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Require a trailing checksum.
    pub fn require_checksum(mut self) -> Self {
        self.checksum_required = true;
        self
    }

    /// Accept arbitrary miniscript inside bare `sh(...)`.
    pub fn allow_miniscript_in_p2sh(mut self) -> Self {
        self.allow_miniscript_in_p2sh = true;
        self
    }

    /// Add a known preimage.
    pub fn preimage(mut self, preimage: Preimage) -> Self {
        self.preimages.push(preimage);
        self
    }

    /// Set the expected signer set.
    pub fn signers(mut self, signers: &[&str]) -> Self {
        self.signers_key_expressions = Some(signers.iter().map(|s| (*s).to_owned()).collect());
        self
    }

    /// Skip the spending-constraints probe.
    pub fn address_only(mut self) -> Self {
        self.address_only = true;
        self
    }
}

/// Descriptor constructor, parameterized by the engine and secp context
/// it injects into every descriptor.
pub struct DescriptorFactory<E: MiniscriptEngine> {
    engine: E,
    secp: Secp256k1<All>,
}

/// Shapes carrying a single key expression.
#[derive(Copy, Clone, PartialEq, Eq)]
enum KeyShape {
    P2pk,
    P2pkh,
    P2wpkh,
    P2shWpkh,
}

/// Shapes carrying a miniscript.
#[derive(Copy, Clone, PartialEq, Eq)]
enum MsShape {
    Wsh,
    ShWsh,
    Sh,
}

impl<E: MiniscriptEngine + Clone> DescriptorFactory<E> {
    /// Build a factory around an engine.
    pub fn new(engine: E) -> Self {
        DescriptorFactory {
            engine,
            secp: Secp256k1::new(),
        }
    }

    /// The BIP-380 checksum of a descriptor payload.
    pub fn checksum(expression: &str) -> Result<String, Error> {
        checksum::checksum(expression)
    }

    /// Parse and compile a descriptor expression.
    pub fn descriptor(
        &self,
        expression: &str,
        params: &DescriptorParams,
    ) -> Result<Descriptor<E>, Error> {
        let isolated = isolate(expression, params)?;

        if let Some(inner) = unwrap_form(&isolated, "addr") {
            let address = Address::<NetworkUnchecked>::from_str(inner)
                .map_err(|_| Error::InvalidAddress(inner.to_owned()))?
                .require_network(params.network)
                .map_err(|_| Error::InvalidAddress(inner.to_owned()))?;
            let payment = Payment::classify_address(&address, inner)?;
            return Ok(Descriptor {
                engine: self.engine.clone(),
                network: params.network,
                payment,
                segwit: None,
                expanded_expression: None,
                miniscript: None,
                expanded_miniscript: None,
                expansion_map: ExpansionMap::new(),
                script: None,
                preimages: params.preimages.clone(),
                constraints: None,
            });
        }
        if let Some(token) = unwrap_form(&isolated, "pk") {
            return self.key_descriptor(KeyShape::P2pk, token, params);
        }
        if let Some(token) = unwrap_form(&isolated, "pkh") {
            return self.key_descriptor(KeyShape::P2pkh, token, params);
        }
        if let Some(token) = unwrap_form(&isolated, "wpkh") {
            return self.key_descriptor(KeyShape::P2wpkh, token, params);
        }
        if let Some(inner) = unwrap_form(&isolated, "sh") {
            if let Some(token) = unwrap_form(inner, "wpkh") {
                return self.key_descriptor(KeyShape::P2shWpkh, token, params);
            }
            if let Some(ms) = unwrap_form(inner, "wsh") {
                return self.miniscript_descriptor(MsShape::ShWsh, ms, params);
            }
            if !params.allow_miniscript_in_p2sh && !is_p2sh_template(inner) {
                return Err(Error::MiniscriptInP2shDisallowed(inner.to_owned()));
            }
            return self.miniscript_descriptor(MsShape::Sh, inner, params);
        }
        if let Some(ms) = unwrap_form(&isolated, "wsh") {
            return self.miniscript_descriptor(MsShape::Wsh, ms, params);
        }

        Err(Error::InvalidExpression(isolated))
    }

    fn key_descriptor(
        &self,
        shape: KeyShape,
        token: &str,
        params: &DescriptorParams,
    ) -> Result<Descriptor<E>, Error> {
        let segwit = matches!(shape, KeyShape::P2wpkh | KeyShape::P2shWpkh);
        let info = parse_key_expression(token, params.network, segwit, &self.secp)?;
        let pubkey = info.pubkey();

        let mut expansion_map = ExpansionMap::new();
        expansion_map.bind(token, info)?;

        let wpkh_hash = || WPubkeyHash::from_byte_array(pubkey.pubkey_hash().to_byte_array());
        let (payment, expanded_expression) = match shape {
            KeyShape::P2pk => (Payment::P2pk { pubkey }, "pk(@0)"),
            KeyShape::P2pkh => (
                Payment::P2pkh {
                    hash: pubkey.pubkey_hash(),
                },
                "pkh(@0)",
            ),
            KeyShape::P2wpkh => (Payment::P2wpkh { hash: wpkh_hash() }, "wpkh(@0)"),
            KeyShape::P2shWpkh => (Payment::P2shWpkh { hash: wpkh_hash() }, "sh(wpkh(@0))"),
        };

        Ok(Descriptor {
            engine: self.engine.clone(),
            network: params.network,
            payment,
            segwit: Some(segwit),
            expanded_expression: Some(expanded_expression.to_owned()),
            miniscript: None,
            expanded_miniscript: None,
            expansion_map,
            script: None,
            preimages: params.preimages.clone(),
            constraints: None,
        })
    }

    fn miniscript_descriptor(
        &self,
        shape: MsShape,
        miniscript: &str,
        params: &DescriptorParams,
    ) -> Result<Descriptor<E>, Error> {
        let segwit = shape != MsShape::Sh;
        let (expanded, expansion_map) =
            expand_miniscript(miniscript, params.network, segwit, &self.secp)?;

        let compiled = self.engine.compile(&expanded)?;
        if !compiled.sane {
            return Err(Error::InsaneMiniscript);
        }
        let asm = substitute_keys(&compiled.asm, &expansion_map);
        let script = script_from_asm(&asm)?;

        let ops = count_non_push_ops(&script)?;
        if ops > MAX_OPS_PER_SCRIPT {
            return Err(Error::TooManyOps { count: ops });
        }
        let max = if segwit {
            MAX_STANDARD_P2WSH_SCRIPT_SIZE
        } else {
            MAX_SCRIPT_ELEMENT_SIZE
        };
        if script.len() > max {
            return Err(Error::ScriptTooLarge {
                size: script.len(),
                max,
            });
        }

        let (payment, expanded_expression) = match shape {
            MsShape::Wsh => (
                Payment::P2wsh {
                    hash: WScriptHash::hash(script.as_bytes()),
                },
                format!("wsh({})", expanded),
            ),
            MsShape::ShWsh => (
                Payment::P2shWsh {
                    hash: WScriptHash::hash(script.as_bytes()),
                },
                format!("sh(wsh({}))", expanded),
            ),
            MsShape::Sh => (
                Payment::P2sh {
                    hash: ScriptHash::hash(script.as_bytes()),
                },
                format!("sh({})", expanded),
            ),
        };

        let constraints = if params.address_only {
            None
        } else {
            let signers: Vec<PublicKey> = match params.signers_key_expressions {
                Some(ref expressions) => {
                    let mut pubkeys = Vec::with_capacity(expressions.len());
                    for expression in expressions {
                        pubkeys.push(
                            parse_key_expression(expression, params.network, segwit, &self.secp)?
                                .pubkey(),
                        );
                    }
                    pubkeys
                }
                None => expansion_map.pubkeys(),
            };
            Some(satisfy::spending_constraints(
                &self.engine,
                &expanded,
                &expansion_map,
                &signers,
                &params.preimages,
            )?)
        };

        Ok(Descriptor {
            engine: self.engine.clone(),
            network: params.network,
            payment,
            segwit: Some(segwit),
            expanded_expression: Some(expanded_expression),
            miniscript: Some(miniscript.to_owned()),
            expanded_miniscript: Some(expanded),
            expansion_map,
            script: Some(script),
            preimages: params.preimages.clone(),
            constraints,
        })
    }
}

/// Strip and verify the checksum, then pin wildcards to the derivation
/// index.
fn isolate(expression: &str, params: &DescriptorParams) -> Result<String, Error> {
    let stripped = checksum::strip_checksum(expression, params.checksum_required)?;
    if stripped.contains('*') {
        let index = params.index.ok_or(Error::InvalidIndex)?;
        Ok(stripped.replace('*', &index.to_string()))
    } else {
        Ok(stripped.to_owned())
    }
}

/// Match `name(inner)` over the full string and return `inner`.
fn unwrap_form<'s>(s: &'s str, name: &str) -> Option<&'s str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

fn is_p2sh_template(inner: &str) -> bool {
    P2SH_TEMPLATES
        .iter()
        .any(|keyword| unwrap_form(inner, keyword).is_some())
}

/// Introspection view over a descriptor's expansion, as returned by
/// [`Descriptor::expand`].
#[derive(Debug, Clone, Copy)]
pub struct Expansion<'a> {
    /// The descriptor with every key expression replaced by its variable.
    pub expanded_expression: Option<&'a str>,
    /// The miniscript fragment, as written.
    pub miniscript: Option<&'a str>,
    /// The miniscript fragment in variable form.
    pub expanded_miniscript: Option<&'a str>,
    /// Variable bindings.
    pub expansion_map: &'a ExpansionMap,
}

/// A parsed descriptor.
///
/// Immutable once constructed: scripts, addresses and the cached spending
/// constraints never change, so a descriptor can be shared freely for
/// read operations. The PSBT operations mutate only the caller's PSBT.
#[derive(Debug, Clone)]
pub struct Descriptor<E: MiniscriptEngine> {
    engine: E,
    network: Network,
    payment: Payment,
    segwit: Option<bool>,
    expanded_expression: Option<String>,
    miniscript: Option<String>,
    expanded_miniscript: Option<String>,
    expansion_map: ExpansionMap,
    script: Option<ScriptBuf>,
    preimages: Vec<Preimage>,
    constraints: Option<(Option<absolute::LockTime>, Option<Sequence>)>,
}

impl<E: MiniscriptEngine> Descriptor<E> {
    /// The payment shape this descriptor resolved to.
    pub fn payment(&self) -> &Payment {
        &self.payment
    }

    /// The network the descriptor was parsed for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The address of the output; `pk(...)` has none.
    pub fn address(&self) -> Result<Address, Error> {
        self.payment.address(self.network)
    }

    /// The output script.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.payment.script_pubkey()
    }

    /// The witness script of `wsh`-backed shapes.
    pub fn witness_script(&self) -> Option<&ScriptBuf> {
        match self.payment {
            Payment::P2wsh { .. } | Payment::P2shWsh { .. } => self.script.as_ref(),
            _ => None,
        }
    }

    /// The redeem script of `sh`-backed shapes.
    pub fn redeem_script(&self) -> Option<ScriptBuf> {
        match self.payment {
            Payment::P2shWpkh { ref hash } => Some(p2wpkh_script(hash)),
            Payment::P2shWsh { ref hash } => Some(p2wsh_script(hash)),
            Payment::P2sh { .. } => self.script.clone(),
            _ => None,
        }
    }

    /// Whether spending uses the witness; `None` for `addr(...)`
    /// descriptors, whose spending shape is unknown.
    pub fn is_segwit(&self) -> Option<bool> {
        self.segwit
    }

    /// The `nLockTime` a spender must set, when the descriptor was probed
    /// and its chosen branch requires one.
    pub fn lock_time(&self) -> Option<absolute::LockTime> {
        self.constraints.and_then(|(lock_time, _)| lock_time)
    }

    /// The `nSequence` a spender must set, when the descriptor was probed
    /// and its chosen branch requires one.
    pub fn sequence(&self) -> Option<Sequence> {
        self.constraints.and_then(|(_, sequence)| sequence)
    }

    /// Introspect the expansion of this descriptor.
    pub fn expand(&self) -> Expansion<'_> {
        Expansion {
            expanded_expression: self.expanded_expression.as_deref(),
            miniscript: self.miniscript.as_deref(),
            expanded_miniscript: self.expanded_miniscript.as_deref(),
            expansion_map: &self.expansion_map,
        }
    }

    /// Produce the script satisfaction for a set of signatures, pinned to
    /// the `(nLockTime, nSequence)` the descriptor committed to at
    /// construction.
    ///
    /// Key-only and address shapes carry no miniscript to satisfy; their
    /// unlocking data is produced directly by
    /// [`finalize_psbt_input`](Self::finalize_psbt_input).
    pub fn script_satisfaction(&self, signatures: &[PartialSig]) -> Result<Vec<u8>, Error> {
        let expanded = self
            .expanded_miniscript
            .as_ref()
            .ok_or(Error::Unresolvable)?;
        let satisfaction = satisfy::satisfy(
            &self.engine,
            expanded,
            &self.expansion_map,
            signatures,
            &self.preimages,
            self.constraints,
        )?;
        Ok(satisfaction.script_satisfaction)
    }

    /// Add the output `vout` of the transaction `tx_hex` as an input of
    /// `psbt`, populating utxo data, BIP32 derivations and the descriptor's
    /// locktime/sequence requirements. Returns the new input index.
    pub fn update_psbt(&self, tx_hex: &str, vout: u32, psbt: &mut Psbt) -> Result<usize, Error> {
        psbt_glue::update(self, tx_hex, vout, psbt)
    }

    /// Finalize input `index` of `psbt` from its partial signatures.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for the PSBT's inputs.
    pub fn finalize_psbt_input(&self, index: usize, psbt: &mut Psbt) -> Result<(), Error> {
        psbt_glue::finalize_input(self, index, psbt)
    }

    pub(crate) fn expansion_map(&self) -> &ExpansionMap {
        &self.expansion_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miniscript::satisfy::PartialSig;
    use crate::testutils::{sig_for, TestEngine, G, G2, G3, SHA256_DIGEST, TPUB};
    use bitcoin::blockdata::opcodes::all as opcodes;
    use bitcoin::blockdata::script::Builder;
    use bitcoin::XOnlyPublicKey;

    fn factory(engine: TestEngine) -> DescriptorFactory<TestEngine> {
        DescriptorFactory::new(engine)
    }

    fn params() -> DescriptorParams {
        DescriptorParams::new(Network::Bitcoin)
    }

    #[test]
    fn addr_bech32_round_trip() {
        let addr = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        let desc = factory(TestEngine::default())
            .descriptor(&format!("addr({})", addr), &params())
            .unwrap();
        assert_eq!(
            format!("{:x}", desc.script_pubkey()),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );
        assert_eq!(desc.address().unwrap().to_string(), addr);
        assert!(desc.is_segwit().is_none());
        assert!(desc.lock_time().is_none() && desc.sequence().is_none());
        assert!(desc.witness_script().is_none() && desc.redeem_script().is_none());
        let expansion = desc.expand();
        assert!(expansion.expanded_expression.is_none());
        assert!(expansion.expansion_map.is_empty());
    }

    #[test]
    fn addr_p2sh_and_p2tr_classify() {
        // A P2SH address built from a known redeem script hash.
        let hash = ScriptHash::hash(b"some redeem script");
        let p2sh = Payment::P2sh { hash };
        let addr = p2sh.address(Network::Bitcoin).unwrap().to_string();
        let desc = factory(TestEngine::default())
            .descriptor(&format!("addr({})", addr), &params())
            .unwrap();
        assert_eq!(*desc.payment(), p2sh);
        assert_eq!(desc.address().unwrap().to_string(), addr);
        // Unknown inner script: nothing to finalize with.
        assert!(desc.redeem_script().is_none());

        // Taproot is recognized from address literals only.
        let secp = Secp256k1::new();
        let internal = XOnlyPublicKey::from_str(&G3[2..]).unwrap();
        let addr = Address::p2tr(&secp, internal, None, Network::Bitcoin);
        let desc = factory(TestEngine::default())
            .descriptor(&format!("addr({})", addr), &params())
            .unwrap();
        assert!(matches!(*desc.payment(), Payment::P2tr { .. }));
        assert!(desc.script_pubkey().is_p2tr());
        assert_eq!(desc.address().unwrap().to_string(), addr.to_string());
    }

    #[test]
    fn addr_network_is_enforced() {
        let testnet_params = DescriptorParams::new(Network::Testnet);
        assert!(matches!(
            factory(TestEngine::default()).descriptor(
                "addr(bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4)",
                &testnet_params
            ),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn pkh_is_legacy_only() {
        let desc = factory(TestEngine::default())
            .descriptor(&format!("pkh({})", G2), &params())
            .unwrap();
        let spk = desc.script_pubkey();
        assert_eq!(spk.len(), 25);
        assert!(spk.as_bytes().starts_with(&[0x76, 0xa9, 0x14]));
        assert!(spk.as_bytes().ends_with(&[0x88, 0xac]));
        assert_eq!(desc.is_segwit(), Some(false));
        assert!(desc.lock_time().is_none() && desc.sequence().is_none());
        assert!(desc.witness_script().is_none());
        assert_eq!(desc.expand().expanded_expression, Some("pkh(@0)"));

        // pk() has no address.
        let desc = factory(TestEngine::default())
            .descriptor(&format!("pk({})", G2), &params())
            .unwrap();
        assert!(matches!(desc.address(), Err(Error::NoAddress)));
    }

    #[test]
    fn sh_wpkh_is_two_layers() {
        let desc = factory(TestEngine::default())
            .descriptor(&format!("sh(wpkh({}))", G), &params())
            .unwrap();
        let spk = desc.script_pubkey();
        assert_eq!(spk.len(), 23);
        assert!(spk.as_bytes().starts_with(&[0xa9, 0x14]));
        assert!(spk.as_bytes().ends_with(&[0x87]));
        assert_eq!(
            format!("{:x}", desc.redeem_script().unwrap()),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );
        assert_eq!(desc.is_segwit(), Some(true));
        assert_eq!(desc.expand().expanded_expression, Some("sh(wpkh(@0))"));
    }

    #[test]
    fn wpkh_ranged_xpub() {
        let expression = format!("wpkh([d34db33f/49h/0h/0h]{}/1/*)", TPUB);
        let testnet = DescriptorParams::new(Network::Testnet);
        // A wildcard needs an index.
        assert!(matches!(
            factory(TestEngine::default()).descriptor(&expression, &testnet),
            Err(Error::InvalidIndex)
        ));

        let desc = factory(TestEngine::default())
            .descriptor(&expression, &testnet.index(5))
            .unwrap();
        assert!(desc.script_pubkey().is_p2wpkh());
        assert_eq!(desc.expand().expanded_expression, Some("wpkh(@0)"));

        let secp = Secp256k1::new();
        let expected = bitcoin::bip32::Xpub::from_str(TPUB)
            .unwrap()
            .derive_pub(
                &secp,
                &vec![
                    bitcoin::bip32::ChildNumber::from_normal_idx(1).unwrap(),
                    bitcoin::bip32::ChildNumber::from_normal_idx(5).unwrap(),
                ],
            )
            .unwrap();
        let key = desc.expand().expansion_map.get(0).unwrap().clone();
        assert_eq!(key.pubkey().inner, expected.public_key);
    }

    #[test]
    fn wsh_older_branch() {
        let engine = TestEngine::pk_older();
        let expression = format!("wsh(and_v(v:pk({}),older(144)))", G2);
        let desc = factory(engine)
            .descriptor(&expression, &params().signers(&[G2]))
            .unwrap();

        assert_eq!(desc.sequence(), Some(Sequence::from_consensus(144)));
        assert!(desc.lock_time().is_none());

        let pubkey = PublicKey::from_str(G2).unwrap();
        let expected = Builder::new()
            .push_key(&pubkey)
            .push_opcode(opcodes::OP_CHECKSIGVERIFY)
            .push_int(144)
            .push_opcode(opcodes::OP_CSV)
            .into_script();
        assert_eq!(desc.witness_script().unwrap().as_script(), expected.as_script());
        assert!(expected.len() <= MAX_STANDARD_P2WSH_SCRIPT_SIZE);
        assert!(desc.script_pubkey().is_p2wsh());

        let (pubkey, signature) = sig_for(2);
        let satisfaction = desc
            .script_satisfaction(&[PartialSig {
                pubkey,
                signature: signature.clone(),
            }])
            .unwrap();
        assert_eq!(satisfaction[0] as usize, signature.len());
        assert_eq!(&satisfaction[1..], &signature[..]);

        // A signature by a key outside the script cannot satisfy it.
        let (stranger, strange_sig) = sig_for(7);
        assert!(matches!(
            desc.script_satisfaction(&[PartialSig {
                pubkey: stranger,
                signature: strange_sig,
            }]),
            Err(Error::Unresolvable)
        ));
    }

    #[test]
    fn wsh_hash_lock_branch() {
        let engine = TestEngine::or_d_sha256();
        let preimage_hex = "42".repeat(32);
        let preimage = Preimage::new(&format!("sha256({})", SHA256_DIGEST), &preimage_hex).unwrap();
        let expression = format!(
            "wsh(or_d(pk({}),and_v(v:pk({}),sha256({}))))",
            G2, G3, SHA256_DIGEST
        );
        let desc = factory(engine)
            .descriptor(
                &expression,
                &params().preimage(preimage.clone()).signers(&[G3]),
            )
            .unwrap();

        // The hash branch carries no timelock.
        assert!(desc.lock_time().is_none() && desc.sequence().is_none());

        let (pubkey, signature) = sig_for(3);
        let satisfaction = desc
            .script_satisfaction(&[PartialSig {
                pubkey,
                signature: signature.clone(),
            }])
            .unwrap();
        // Contains the preimage, the signature, and the dissatisfaction of
        // the first branch.
        let preimage_bytes = preimage.preimage();
        assert!(satisfaction
            .windows(preimage_bytes.len())
            .any(|w| w == preimage_bytes));
        assert!(satisfaction.windows(signature.len()).any(|w| w == &signature[..]));
        assert_eq!(*satisfaction.last().unwrap(), 0x00);

        // Supersets of the known material keep satisfying.
        let (pubkey2, signature2) = sig_for(2);
        assert!(desc
            .script_satisfaction(&[
                PartialSig {
                    pubkey,
                    signature,
                },
                PartialSig {
                    pubkey: pubkey2,
                    signature: signature2,
                },
            ])
            .is_ok());
    }

    #[test]
    fn bare_sh_template_gate() {
        let expression = format!("sh(and_v(v:pk({}),older(144)))", G2);
        assert!(matches!(
            factory(TestEngine::pk_older()).descriptor(&expression, &params()),
            Err(Error::MiniscriptInP2shDisallowed(_))
        ));

        let desc = factory(TestEngine::pk_older())
            .descriptor(&expression, &params().allow_miniscript_in_p2sh())
            .unwrap();
        assert!(matches!(*desc.payment(), Payment::P2sh { .. }));
        assert!(desc.script_pubkey().is_p2sh());
        assert!(desc.redeem_script().is_some());
        assert_eq!(desc.is_segwit(), Some(false));

        // The classic templates stay allowed without the opt-in.
        let desc = factory(TestEngine::multi2())
            .descriptor(&format!("sh(multi(2,{},{}))", G2, G3), &params())
            .unwrap();
        assert!(desc.script_pubkey().is_p2sh());
        assert_eq!(desc.expand().expansion_map.len(), 2);
    }

    #[test]
    fn resource_limits_are_enforced() {
        // A compiled script larger than a P2SH redeem script may be.
        let engine = TestEngine::new()
            .compiled("pk(@0)", &format!("<{}>", "aa".repeat(521)), true)
            .solution("pk(@0)", &["<sig(@0)>"], "<sig(@0)>", None, None);
        assert!(matches!(
            factory(engine).descriptor(
                &format!("sh(pk({}))", G2),
                &params().allow_miniscript_in_p2sh()
            ),
            Err(Error::ScriptTooLarge { max: 520, .. })
        ));

        // More than 201 non-push opcodes.
        let asm = vec!["OP_DUP"; 202].join(" ");
        let engine = TestEngine::new().compiled("pk(@0)", &asm, true);
        assert!(matches!(
            factory(engine).descriptor(&format!("wsh(pk({}))", G2), &params()),
            Err(Error::TooManyOps { count: 202 })
        ));

        // Not sane: rejected outright.
        let engine = TestEngine::new().compiled("pk(@0)", "<@0> OP_CHECKSIG", false);
        assert!(matches!(
            factory(engine).descriptor(&format!("wsh(pk({}))", G2), &params()),
            Err(Error::InsaneMiniscript)
        ));
    }

    #[test]
    fn checksum_isolation_and_idempotence() {
        let expression = format!("wpkh([d34db33f/49h/0h/0h]{}/1/*)", TPUB);
        let check = checksum::checksum(&expression).unwrap();
        let testnet = DescriptorParams::new(Network::Testnet).index(5);

        let bare = factory(TestEngine::default())
            .descriptor(&expression, &testnet)
            .unwrap();
        let checked = factory(TestEngine::default())
            .descriptor(&format!("{}#{}", expression, check), &testnet)
            .unwrap();
        assert_eq!(bare.script_pubkey(), checked.script_pubkey());
        assert_eq!(bare.address().unwrap(), checked.address().unwrap());

        assert!(matches!(
            factory(TestEngine::default())
                .descriptor(&format!("{}#qqqqqqqq", expression), &testnet),
            Err(Error::BadChecksum { .. })
        ));
        assert!(matches!(
            factory(TestEngine::default())
                .descriptor(&expression, &testnet.clone().require_checksum()),
            Err(Error::MissingChecksum)
        ));

        // Same inputs, same outputs.
        let engine = TestEngine::pk_older();
        let expression = format!("wsh(and_v(v:pk({}),older(144)))", G2);
        let a = factory(engine.clone())
            .descriptor(&expression, &params())
            .unwrap();
        let b = factory(engine).descriptor(&expression, &params()).unwrap();
        assert_eq!(a.script_pubkey(), b.script_pubkey());
        assert_eq!(a.witness_script(), b.witness_script());
        assert_eq!(a.sequence(), b.sequence());
        assert_eq!(a.lock_time(), b.lock_time());
    }

    #[test]
    fn address_only_skips_the_probe() {
        // An engine with no canned solutions: the probe would error.
        let engine = TestEngine::new().compiled(
            "and_v(v:pk(@0),older(144))",
            "<@0> OP_CHECKSIGVERIFY 144 OP_CHECKSEQUENCEVERIFY",
            true,
        );
        let expression = format!("wsh(and_v(v:pk({}),older(144)))", G2);
        assert!(factory(engine.clone())
            .descriptor(&expression, &params())
            .is_err());

        let desc = factory(engine)
            .descriptor(&expression, &params().address_only())
            .unwrap();
        assert!(desc.lock_time().is_none() && desc.sequence().is_none());
        assert!(desc.script_pubkey().is_p2wsh());
    }

    #[test]
    fn unknown_forms_are_rejected() {
        assert!(matches!(
            factory(TestEngine::default()).descriptor("frob(deadbeef)", &params()),
            Err(Error::InvalidExpression(_))
        ));
        // Trailing garbage fails the anchored match.
        assert!(matches!(
            factory(TestEngine::default()).descriptor(&format!("pkh({})x", G2), &params()),
            Err(Error::InvalidExpression(_))
        ));
    }
}
