// SPDX-License-Identifier: CC0-1.0

//! Test scaffolding: fixed keys and a deterministic table-driven engine.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{absolute, NetworkKind, PrivateKey, PublicKey, Sequence};

use crate::engine::{Compilation, MiniscriptEngine, Solution};
use crate::Error;

/// Generator point of secp256k1; also the public key of the secret `1`.
pub const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
/// G in uncompressed encoding.
pub const UNCOMPRESSED_G: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
/// 2·G, the public key of the secret `2`.
pub const G2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
/// 3·G, the public key of the secret `3`.
pub const G3: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

pub const TPUB: &str = "tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK";
pub const XPUB: &str = "xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL";
pub const XPRV: &str = "xprvA1RpRA33e1JQ7ifknakTFpgNXPmW2YvmhqLQYMmrj4xJXXWYpDPS3xz7iAxn8L39njGVyuoseXzU6rcxFLJ8HFsTjSyQbLYnMpCqE2VbFWc";

/// An arbitrary but fixed sha256-sized digest for hash lock tests.
pub const SHA256_DIGEST: &str = "50863ad64a87ae8a2fe83c1af1a8403cb53f53e486d8511dad8a04887e5b2352";

/// A mainnet private key with the small secret `n`.
pub fn wif_key(n: u8, compressed: bool) -> PrivateKey {
    let mut bytes = [0u8; 32];
    bytes[31] = n;
    let secret = SecretKey::from_slice(&bytes).expect("small nonzero secret");
    if compressed {
        PrivateKey::new(secret, NetworkKind::Main)
    } else {
        PrivateKey::new_uncompressed(secret, NetworkKind::Main)
    }
}

/// A deterministic signature by the small secret `n` over a fixed digest:
/// DER bytes plus the SIGHASH_ALL flag, and the signing public key.
pub fn sig_for(n: u8) -> (PublicKey, Vec<u8>) {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[31] = n;
    let secret = SecretKey::from_slice(&bytes).expect("small nonzero secret");
    let pubkey = PublicKey::new(secret.public_key(&secp));
    let message = Message::from_digest([0xab; 32]);
    let mut signature = secp.sign_ecdsa(&message, &secret).serialize_der().to_vec();
    signature.push(0x01); // SIGHASH_ALL
    (pubkey, signature)
}

#[derive(Clone)]
struct CannedSolution {
    requires: Vec<String>,
    asm: String,
    lock_time: Option<u32>,
    sequence: Option<u32>,
}

/// Table-driven engine: canned compilations and solutions keyed by the
/// expanded miniscript. Satisfy returns the canned solutions whose
/// required tokens are all known, in table order.
#[derive(Clone, Default)]
pub struct TestEngine {
    compilations: BTreeMap<String, Compilation>,
    solutions: BTreeMap<String, Vec<CannedSolution>>,
}

impl TestEngine {
    pub fn new() -> Self {
        TestEngine::default()
    }

    pub fn compiled(mut self, miniscript: &str, asm: &str, sane: bool) -> Self {
        self.compilations.insert(
            miniscript.to_owned(),
            Compilation {
                asm: asm.to_owned(),
                sane,
            },
        );
        self
    }

    pub fn solution(
        mut self,
        miniscript: &str,
        requires: &[&str],
        asm: &str,
        lock_time: Option<u32>,
        sequence: Option<u32>,
    ) -> Self {
        self.solutions
            .entry(miniscript.to_owned())
            .or_default()
            .push(CannedSolution {
                requires: requires.iter().map(|s| (*s).to_owned()).collect(),
                asm: asm.to_owned(),
                lock_time,
                sequence,
            });
        self
    }

    /// `pk(@0)`
    pub fn single_pk() -> Self {
        TestEngine::new()
            .compiled("pk(@0)", "<@0> OP_CHECKSIG", true)
            .solution("pk(@0)", &["<sig(@0)>"], "<sig(@0)>", None, None)
    }

    /// `and_v(v:pk(@0),older(144))`
    pub fn pk_older() -> Self {
        let ms = "and_v(v:pk(@0),older(144))";
        TestEngine::new()
            .compiled(ms, "<@0> OP_CHECKSIGVERIFY 144 OP_CHECKSEQUENCEVERIFY", true)
            .solution(ms, &["<sig(@0)>"], "<sig(@0)>", None, Some(144))
    }

    /// `and_v(v:pk(@0),after(500000))`
    pub fn pk_after() -> Self {
        let ms = "and_v(v:pk(@0),after(500000))";
        TestEngine::new()
            .compiled(
                ms,
                "<@0> OP_CHECKSIGVERIFY 500000 OP_CHECKLOCKTIMEVERIFY",
                true,
            )
            .solution(ms, &["<sig(@0)>"], "<sig(@0)>", Some(500_000), None)
    }

    /// `or_d(pk(@0),and_v(v:pk(@1),older(144)))`
    pub fn or_d_older() -> Self {
        let ms = "or_d(pk(@0),and_v(v:pk(@1),older(144)))";
        TestEngine::new()
            .compiled(
                ms,
                "<@0> OP_CHECKSIG OP_IFDUP OP_NOTIF <@1> OP_CHECKSIGVERIFY 144 OP_CHECKSEQUENCEVERIFY OP_ENDIF",
                true,
            )
            .solution(ms, &["<sig(@0)>"], "<sig(@0)>", None, None)
            .solution(ms, &["<sig(@1)>"], "<sig(@1)> 0", None, Some(144))
    }

    /// `or_d(pk(@0),and_v(v:pk(@1),sha256(SHA256_DIGEST)))`
    pub fn or_d_sha256() -> Self {
        let ms = format!("or_d(pk(@0),and_v(v:pk(@1),sha256({})))", SHA256_DIGEST);
        let preimage = format!("<sha256_preimage({})>", SHA256_DIGEST);
        TestEngine::new()
            .compiled(
                &ms,
                &format!(
                    "<@0> OP_CHECKSIG OP_IFDUP OP_NOTIF <@1> OP_CHECKSIGVERIFY OP_SIZE 32 OP_EQUALVERIFY OP_SHA256 <{}> OP_EQUAL OP_ENDIF",
                    SHA256_DIGEST
                ),
                true,
            )
            .solution(&ms, &["<sig(@0)>"], "<sig(@0)>", None, None)
            .solution(
                &ms,
                &[preimage.as_str(), "<sig(@1)>"],
                &format!("{} <sig(@1)> 0", preimage),
                None,
                None,
            )
    }

    /// `multi(2,@0,@1)`
    pub fn multi2() -> Self {
        let ms = "multi(2,@0,@1)";
        TestEngine::new()
            .compiled(ms, "2 <@0> <@1> 2 OP_CHECKMULTISIG", true)
            .solution(
                ms,
                &["<sig(@0)>", "<sig(@1)>"],
                "0 <sig(@0)> <sig(@1)>",
                None,
                None,
            )
    }
}

impl MiniscriptEngine for TestEngine {
    fn compile(&self, miniscript: &str) -> Result<Compilation, Error> {
        self.compilations
            .get(miniscript)
            .cloned()
            .ok_or_else(|| Error::Engine(format!("no compilation for '{}'", miniscript)))
    }

    fn satisfy(&self, miniscript: &str, knowns: &BTreeSet<String>) -> Result<Vec<Solution>, Error> {
        let canned = self
            .solutions
            .get(miniscript)
            .ok_or_else(|| Error::Engine(format!("no solutions for '{}'", miniscript)))?;
        Ok(canned
            .iter()
            .filter(|solution| solution.requires.iter().all(|token| knowns.contains(token)))
            .map(|solution| Solution {
                asm: solution.asm.clone(),
                lock_time: solution.lock_time.map(absolute::LockTime::from_consensus),
                sequence: solution.sequence.map(Sequence::from_consensus),
            })
            .collect())
    }
}
