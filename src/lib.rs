// SPDX-License-Identifier: CC0-1.0

//! # Bitcoin Output Descriptors
//!
//! Parsing and satisfaction of Bitcoin output descriptors whose script
//! expressions are written in Miniscript. A descriptor string is checked
//! against its BIP-380 checksum, ranged (`*`) descriptors are pinned to a
//! derivation index, key expressions are resolved to concrete public keys,
//! and Miniscript fragments are compiled into script bytes through an
//! injected [`MiniscriptEngine`]. Once constructed, a [`Descriptor`] exposes
//! the resulting scriptPubKey, address, witness/redeem scripts, the
//! `nLockTime`/`nSequence` a spender must commit to, script satisfactions
//! for a set of signatures and hash preimages, and PSBT input
//! population/finalization.
//!
//! The Miniscript compiler and satisfier themselves are external: this
//! crate drives them through the [`engine::MiniscriptEngine`] trait and
//! takes care of everything around them. Elliptic curve operations, BIP32
//! derivation and the PSBT container come from the `bitcoin` crate.
//!
//! ```no_run
//! # use bitcoin_descriptors::{DescriptorFactory, DescriptorParams};
//! # fn with_engine<E: bitcoin_descriptors::MiniscriptEngine + Clone>(engine: E) {
//! let factory = DescriptorFactory::new(engine);
//! let params = DescriptorParams::new(bitcoin::Network::Bitcoin);
//! let desc = factory
//!     .descriptor("wpkh(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)", &params)
//!     .unwrap();
//! let spk = desc.script_pubkey();
//! # }
//! ```

use std::{error, fmt};

use bitcoin::bip32;

pub mod descriptor;
pub mod engine;
pub mod miniscript;

mod psbt;
#[cfg(test)]
pub(crate) mod testutils;

pub use crate::descriptor::checksum::checksum;
pub use crate::descriptor::key::KeyInfo;
pub use crate::descriptor::payment::Payment;
pub use crate::descriptor::{Descriptor, DescriptorFactory, DescriptorParams, Expansion};
pub use crate::engine::{Compilation, MiniscriptEngine, Solution};
pub use crate::miniscript::satisfy::{PartialSig, Preimage, Satisfaction};
pub use crate::miniscript::ExpansionMap;

/// Descriptor error
#[derive(Debug)]
pub enum Error {
    /// The expression matches no recognized descriptor form
    InvalidExpression(String),
    /// The `#` suffix does not match the checksum of the preceding payload
    BadChecksum {
        /// Checksum found after the `#` separator
        actual: String,
        /// Checksum computed over the payload
        expected: String,
    },
    /// A checksum was required but the expression carries none
    MissingChecksum,
    /// Character outside the descriptor character set
    Unprintable(u8),
    /// The expression is ranged (`*`) but no derivation index was supplied
    InvalidIndex,
    /// The `addr(...)` payload is not an address for the target network
    InvalidAddress(String),
    /// Malformed key expression
    InvalidKey(String),
    /// Uncompressed public key in a segwit context
    SegwitRequiresCompressed(String),
    /// An xpub cannot derive through a hardened step
    HardenedFromXpub(String),
    /// Two distinct key expressions resolve to the same public key
    DuplicatePubkey(String),
    /// Malformed preimage or digest supplied to [`Preimage::new`]
    InvalidPreimage(String),
    /// The compiler rejected the expanded miniscript as not sane
    InsaneMiniscript,
    /// Compiled script exceeds the size allowed by its context
    ScriptTooLarge {
        /// Size of the compiled script
        size: usize,
        /// Limit for the script context
        max: usize,
    },
    /// Compiled script exceeds the 201 non-push opcode limit
    TooManyOps {
        /// Number of non-push opcodes in the compiled script
        count: usize,
    },
    /// `sh(...)` carries miniscript and `allow_miniscript_in_p2sh` is not set
    MiniscriptInP2shDisallowed(String),
    /// ASM token which is neither a push, an opcode name nor a number
    UnknownAsmToken(String),
    /// A `<...>` token still carries an unsubstituted variable
    UnsubstitutedVariable(String),
    /// The satisfier found no non-malleable solution for the known material
    Unresolvable,
    /// No solution reproduces the `(nLockTime, nSequence)` the descriptor
    /// committed to
    ConstraintsUnmet,
    /// The descriptor shape has no address form (`pk(...)`)
    NoAddress,
    /// The PSBT input carries no usable partial signature
    NoSignatures,
    /// The previous transaction has no output at the requested index
    NoSuchOutput(u32),
    /// The PSBT locktime is already pinned to a different nonzero value
    LocktimeConflict,
    /// Failed to decode a transaction from hex
    Transaction(String),
    /// Error reported by the external miniscript engine
    Engine(String),
    /// BIP32 derivation error
    Bip32(bip32::Error),
    /// rust-bitcoin script error
    Script(bitcoin::blockdata::script::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidExpression(ref s) => write!(f, "invalid descriptor expression: '{}'", s),
            Error::BadChecksum {
                ref actual,
                ref expected,
            } => write!(f, "invalid checksum '{}', expected '{}'", actual, expected),
            Error::MissingChecksum => f.write_str("descriptor carries no checksum"),
            Error::Unprintable(ch) => write!(f, "invalid character 0x{:02x} in descriptor", ch),
            Error::InvalidIndex => f.write_str("ranged descriptor requires a derivation index"),
            Error::InvalidAddress(ref s) => write!(f, "invalid address: '{}'", s),
            Error::InvalidKey(ref s) => write!(f, "invalid key expression: {}", s),
            Error::SegwitRequiresCompressed(ref s) => {
                write!(f, "uncompressed key '{}' in a segwit context", s)
            }
            Error::HardenedFromXpub(ref s) => {
                write!(f, "hardened derivation from public key '{}'", s)
            }
            Error::DuplicatePubkey(ref s) => write!(f, "duplicated public key {}", s),
            Error::InvalidPreimage(ref s) => write!(f, "invalid preimage: {}", s),
            Error::InsaneMiniscript => f.write_str("miniscript is not sane"),
            Error::ScriptTooLarge { size, max } => {
                write!(f, "script of {} bytes exceeds the {} byte limit", size, max)
            }
            Error::TooManyOps { count } => {
                write!(f, "script has {} non-push opcodes, limit is 201", count)
            }
            Error::MiniscriptInP2shDisallowed(ref s) => {
                write!(f, "miniscript '{}' not allowed under bare sh()", s)
            }
            Error::UnknownAsmToken(ref s) => write!(f, "unknown script asm token '{}'", s),
            Error::UnsubstitutedVariable(ref s) => {
                write!(f, "unsubstituted variable in asm token '{}'", s)
            }
            Error::Unresolvable => f.write_str("no non-malleable satisfaction exists"),
            Error::ConstraintsUnmet => {
                f.write_str("no satisfaction matches the descriptor locktime/sequence")
            }
            Error::NoAddress => f.write_str("descriptor shape has no address form"),
            Error::NoSignatures => f.write_str("no usable signature for this input"),
            Error::NoSuchOutput(vout) => write!(f, "transaction has no output {}", vout),
            Error::LocktimeConflict => f.write_str("psbt locktime already set to another value"),
            Error::Transaction(ref s) => write!(f, "invalid transaction: {}", s),
            Error::Engine(ref s) => write!(f, "miniscript engine: {}", s),
            Error::Bip32(ref e) => write!(f, "bip32: {}", e),
            Error::Script(ref e) => write!(f, "script: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Bip32(ref e) => Some(e),
            Error::Script(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<bip32::Error> for Error {
    fn from(e: bip32::Error) -> Error {
        Error::Bip32(e)
    }
}

impl From<bitcoin::blockdata::script::Error> for Error {
    fn from(e: bitcoin::blockdata::script::Error) -> Error {
        Error::Script(e)
    }
}
