// SPDX-License-Identifier: CC0-1.0

//! Key expressions
//!
//! A key expression is a raw public key, a WIF private key or an extended
//! key with an optional `[fingerprint/path]` origin prefix and an optional
//! `/child/child` derivation tail. Parsing resolves the expression to a
//! concrete public key and keeps the origin and derivation metadata that
//! PSBT population needs.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource, Xpriv, Xpub};
use bitcoin::hex::FromHex;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{secp256k1, Network, NetworkKind, PrivateKey, PublicKey};

use crate::Error;

/// A resolved key expression.
///
/// The public key is always concrete: extended keys have been walked down
/// their derivation tail, WIF keys have been converted through secp256k1.
/// Invariant: when an extended key is present, `pubkey` equals the key
/// obtained by deriving `derivation_path` from `xpub`.
#[derive(Clone, PartialEq)]
pub struct KeyInfo {
    pubkey: PublicKey,
    origin: Option<(Fingerprint, DerivationPath)>,
    xpub: Option<Xpub>,
    derivation_path: Option<DerivationPath>,
    privkey: Option<PrivateKey>,
}

// Keeps private key material out of debug output.
impl fmt::Debug for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyInfo")
            .field("pubkey", &self.pubkey)
            .field("origin", &self.origin)
            .field("derivation_path", &self.derivation_path)
            .field("has_privkey", &self.privkey.is_some())
            .finish()
    }
}

impl KeyInfo {
    /// The resolved public key.
    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    /// Key origin: master fingerprint and the path from the master to the
    /// expression's key material, as given in the `[..]` prefix. Hardened
    /// steps consumed from an xprv are folded in here.
    pub fn origin(&self) -> Option<&(Fingerprint, DerivationPath)> {
        self.origin.as_ref()
    }

    /// The extended public key, when the expression carried one (an xprv
    /// is converted after applying its hardened steps).
    pub fn xpub(&self) -> Option<&Xpub> {
        self.xpub.as_ref()
    }

    /// Derivation steps applied on the extended key itself.
    pub fn derivation_path(&self) -> Option<&DerivationPath> {
        self.derivation_path.as_ref()
    }

    /// The decoded WIF private key, when the expression was one.
    pub fn privkey(&self) -> Option<&PrivateKey> {
        self.privkey.as_ref()
    }

    /// Fingerprint of the master this key descends from: the origin
    /// fingerprint when an origin is present, otherwise the extended key's
    /// own fingerprint.
    pub fn master_fingerprint(&self) -> Option<Fingerprint> {
        if let Some((fingerprint, _)) = self.origin {
            return Some(fingerprint);
        }
        self.xpub.as_ref().map(|xpub| xpub.fingerprint())
    }

    /// Full path from the master to the resolved public key: origin path
    /// followed by the in-expression derivation steps.
    pub fn full_derivation_path(&self) -> Option<DerivationPath> {
        if self.origin.is_none() && self.xpub.is_none() {
            return None;
        }
        let base = self
            .origin
            .as_ref()
            .map(|(_, path)| path.clone())
            .unwrap_or_else(DerivationPath::master);
        match self.derivation_path {
            Some(ref tail) => Some(base.extend(tail)),
            None => Some(base),
        }
    }

    /// PSBT `bip32_derivation` entry for this key, when both a master
    /// fingerprint and a path are known.
    pub(crate) fn bip32_derivation(&self) -> Option<(secp256k1::PublicKey, KeySource)> {
        let fingerprint = self.master_fingerprint()?;
        let path = self.full_derivation_path()?;
        Some((self.pubkey.inner, (fingerprint, path)))
    }
}

/// Parse a key expression in a given network and script context.
pub(crate) fn parse_key_expression(
    token: &str,
    network: Network,
    segwit: bool,
    secp: &Secp256k1<All>,
) -> Result<KeyInfo, Error> {
    let (origin, key_part) = split_origin(token)?;

    // Raw hex public key.
    if (key_part.len() == 66 || key_part.len() == 130)
        && key_part.bytes().all(|b| b.is_ascii_hexdigit())
    {
        let pubkey = PublicKey::from_str(key_part)
            .map_err(|e| Error::InvalidKey(format!("'{}': {}", token, e)))?;
        if segwit && !pubkey.compressed {
            return Err(Error::SegwitRequiresCompressed(token.to_owned()));
        }
        return Ok(KeyInfo {
            pubkey,
            origin,
            xpub: None,
            derivation_path: None,
            privkey: None,
        });
    }

    // WIF private key.
    if let Ok(privkey) = PrivateKey::from_wif(key_part) {
        if privkey.network != NetworkKind::from(network) {
            return Err(Error::InvalidKey(format!(
                "'{}': wrong network for WIF key",
                token
            )));
        }
        let pubkey = privkey.public_key(secp);
        if segwit && !privkey.compressed {
            return Err(Error::SegwitRequiresCompressed(token.to_owned()));
        }
        return Ok(KeyInfo {
            pubkey,
            origin,
            xpub: None,
            derivation_path: None,
            privkey: Some(privkey),
        });
    }

    // Extended key with optional derivation tail.
    let mut parts = key_part.splitn(2, '/');
    let xkey_str = parts.next().expect("splitn always yields one part");
    let path = match parts.next() {
        Some(tail) => parse_derivation_steps(tail, token)?,
        None => Vec::new(),
    };

    if xkey_str.contains("prv") {
        let xprv = Xpriv::from_str(xkey_str)
            .map_err(|e| Error::InvalidKey(format!("'{}': {}", token, e)))?;
        if xprv.network != NetworkKind::from(network) {
            return Err(Error::InvalidKey(format!(
                "'{}': wrong network for extended key",
                token
            )));
        }
        return resolve_xprv(xprv, origin, path, token, secp);
    }

    if xkey_str.contains("pub") {
        let xpub = Xpub::from_str(xkey_str)
            .map_err(|e| Error::InvalidKey(format!("'{}': {}", token, e)))?;
        if xpub.network != NetworkKind::from(network) {
            return Err(Error::InvalidKey(format!(
                "'{}': wrong network for extended key",
                token
            )));
        }
        if path.iter().any(|child| child.is_hardened()) {
            return Err(Error::HardenedFromXpub(token.to_owned()));
        }
        let derived = xpub.derive_pub(secp, &path)?;
        return Ok(KeyInfo {
            pubkey: PublicKey::new(derived.public_key),
            origin,
            xpub: Some(xpub),
            derivation_path: Some(DerivationPath::from(path)),
            privkey: None,
        });
    }

    Err(Error::InvalidKey(format!(
        "'{}' matches no key expression form",
        token
    )))
}

/// Resolve an xprv expression, folding the hardened prefix of its path
/// into the origin so that the remaining public derivation can be walked
/// from the recorded xpub.
fn resolve_xprv(
    xprv: Xpriv,
    origin: Option<(Fingerprint, DerivationPath)>,
    path: Vec<ChildNumber>,
    token: &str,
    secp: &Secp256k1<All>,
) -> Result<KeyInfo, Error> {
    let public_suffix_len = path.iter().rev().take_while(|c| c.is_normal()).count();
    let fold = path.len() - public_suffix_len;
    let (hardened, suffix) = path.split_at(fold);

    let folded_xprv = xprv
        .derive_priv(secp, &hardened)
        .map_err(|_| Error::InvalidKey(format!("'{}': cannot derive hardened steps", token)))?;
    let xpub = Xpub::from_priv(secp, &folded_xprv);

    let origin = match origin {
        Some((fingerprint, origin_path)) => Some((fingerprint, origin_path.extend(hardened))),
        None if !hardened.is_empty() => {
            Some((xprv.fingerprint(secp), DerivationPath::from(hardened.to_vec())))
        }
        None => None,
    };

    let derived = xpub.derive_pub(secp, &suffix)?;
    Ok(KeyInfo {
        pubkey: PublicKey::new(derived.public_key),
        origin,
        xpub: Some(xpub),
        derivation_path: Some(DerivationPath::from(suffix.to_vec())),
        privkey: None,
    })
}

/// Split a `[fingerprint/path]` origin prefix off a key expression.
fn split_origin(token: &str) -> Result<(Option<(Fingerprint, DerivationPath)>, &str), Error> {
    if !token.starts_with('[') {
        return Ok((None, token));
    }
    let end = token
        .find(']')
        .ok_or_else(|| Error::InvalidKey(format!("'{}': unterminated origin", token)))?;
    let content = &token[1..end];
    if content.len() < 8 {
        return Err(Error::InvalidKey(format!("'{}': origin too short", token)));
    }
    let fingerprint = <[u8; 4]>::from_hex(&content[..8])
        .map(Fingerprint::from)
        .map_err(|_| Error::InvalidKey(format!("'{}': malformed origin fingerprint", token)))?;
    let path = if content.len() > 8 {
        if !content[8..].starts_with('/') {
            return Err(Error::InvalidKey(format!("'{}': malformed origin path", token)));
        }
        DerivationPath::from(parse_derivation_steps(&content[9..], token)?)
    } else {
        DerivationPath::master()
    };
    Ok((Some((fingerprint, path)), &token[end + 1..]))
}

/// Parse `child/child/...` derivation steps; `h`, `H` and `'` mark
/// hardened children.
fn parse_derivation_steps(s: &str, token: &str) -> Result<Vec<ChildNumber>, Error> {
    let mut steps = Vec::new();
    for part in s.split('/') {
        let (index, hardened) = match part
            .strip_suffix('\'')
            .or_else(|| part.strip_suffix('h'))
            .or_else(|| part.strip_suffix('H'))
        {
            Some(stripped) => (stripped, true),
            None => (part, false),
        };
        let index: u32 = index
            .parse()
            .map_err(|_| Error::InvalidKey(format!("'{}': bad child index '{}'", token, part)))?;
        let child = if hardened {
            ChildNumber::from_hardened_idx(index)?
        } else {
            ChildNumber::from_normal_idx(index)?
        };
        steps.push(child);
    }
    Ok(steps)
}

/// Lexical test used by the expander: does this token have the shape of a
/// key expression? A positive answer does not mean the token parses, only
/// that it must parse for the containing miniscript to be valid.
pub(crate) fn looks_like_key_expression(token: &str) -> bool {
    if token.starts_with('[') {
        return true;
    }
    if token.contains("pub") || token.contains("prv") {
        return true;
    }
    if (token.len() == 66 || token.len() == 130)
        && token.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return true;
    }
    // WIF keys are 51 or 52 base58 characters.
    (51..=52).contains(&token.len()) && token.bytes().all(is_base58)
}

fn is_base58(b: u8) -> bool {
    matches!(b, b'1'..=b'9' | b'A'..=b'H' | b'J'..=b'N' | b'P'..=b'Z' | b'a'..=b'k' | b'm'..=b'z')
}
