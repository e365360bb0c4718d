// SPDX-License-Identifier: CC0-1.0

//! Miniscript expansion
//!
//! Key expressions inside a miniscript are replaced by positional `@k`
//! variables before the fragment is handed to the external engine. This
//! decouples policy compilation from key material: the engine only ever
//! sees variables, and the [`ExpansionMap`] binds them back to resolved
//! keys for script assembly and satisfaction.

pub mod satisfy;
pub mod script;

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, PublicKey};

use crate::descriptor::key::{looks_like_key_expression, parse_key_expression, KeyInfo};
use crate::Error;

/// Ordered binding of `@k` variables to resolved key expressions.
///
/// Indices reflect first appearance in the source miniscript and are dense:
/// a map of `n` entries binds exactly `@0` through `@{n-1}`. All bound
/// public keys are distinct.
#[derive(Debug, Clone, Default)]
pub struct ExpansionMap {
    entries: Vec<(String, KeyInfo)>,
}

impl ExpansionMap {
    pub(crate) fn new() -> Self {
        ExpansionMap {
            entries: Vec::new(),
        }
    }

    /// Number of variables bound.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no variable is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The key bound to `@k`.
    pub fn get(&self, k: usize) -> Option<&KeyInfo> {
        self.entries.get(k).map(|(_, info)| info)
    }

    /// The source key expression bound to `@k`.
    pub fn key_expression(&self, k: usize) -> Option<&str> {
        self.entries.get(k).map(|(token, _)| token.as_str())
    }

    /// Iterate `(k, key expression, resolved key)` in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, &KeyInfo)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(k, (token, info))| (k, token.as_str(), info))
    }

    /// The variable whose key resolves to `pubkey`.
    pub(crate) fn index_of_pubkey(&self, pubkey: &PublicKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|(_, info)| info.pubkey() == *pubkey)
    }

    /// All bound public keys, in variable order.
    pub(crate) fn pubkeys(&self) -> Vec<PublicKey> {
        self.entries.iter().map(|(_, info)| info.pubkey()).collect()
    }

    /// Bind `token` and return its variable index; a token seen before
    /// keeps its index, a fresh token resolving to an already-bound pubkey
    /// is rejected.
    pub(crate) fn bind(&mut self, token: &str, info: KeyInfo) -> Result<usize, Error> {
        if let Some(k) = self.entries.iter().position(|(t, _)| t == token) {
            return Ok(k);
        }
        if self.index_of_pubkey(&info.pubkey()).is_some() {
            return Err(Error::DuplicatePubkey(info.pubkey().to_string()));
        }
        self.entries.push((token.to_owned(), info));
        Ok(self.entries.len() - 1)
    }
}

/// Replace every key expression of `miniscript` by its `@k` variable.
///
/// Scans left to right for maximal key-shaped tokens (the same lexical
/// shapes the key parser accepts), resolves each and assigns variables in
/// order of first appearance. The result is deterministic.
pub(crate) fn expand_miniscript(
    miniscript: &str,
    network: Network,
    segwit: bool,
    secp: &Secp256k1<All>,
) -> Result<(String, ExpansionMap), Error> {
    let mut map = ExpansionMap::new();
    let mut expanded = String::with_capacity(miniscript.len());

    for piece in split_tokens(miniscript) {
        match piece {
            Piece::Delimiter(c) => expanded.push(c),
            Piece::Token(token) => {
                if looks_like_key_expression(token) {
                    let info = parse_key_expression(token, network, segwit, secp)?;
                    let k = map.bind(token, info)?;
                    expanded.push('@');
                    expanded.push_str(&k.to_string());
                } else {
                    expanded.push_str(token);
                }
            }
        }
    }

    Ok((expanded, map))
}

enum Piece<'s> {
    Token(&'s str),
    Delimiter(char),
}

/// Split a miniscript on its structural delimiters, keeping them.
fn split_tokens(s: &str) -> impl Iterator<Item = Piece<'_>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, c) in s.char_indices() {
        if matches!(c, '(' | ')' | ',' | '{' | '}') {
            if start < pos {
                pieces.push(Piece::Token(&s[start..pos]));
            }
            pieces.push(Piece::Delimiter(c));
            start = pos + c.len_utf8();
        }
    }
    if start < s.len() {
        pieces.push(Piece::Token(&s[start..]));
    }
    pieces.into_iter()
}
