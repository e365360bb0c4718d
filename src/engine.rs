// SPDX-License-Identifier: CC0-1.0

//! Miniscript engine capability
//!
//! The Miniscript compiler and satisfier are external collaborators: this
//! crate prepares their input (key expressions replaced by positional
//! `@k` variables) and post-processes their output (placeholder
//! substitution and script assembly), but never inspects a Miniscript AST
//! itself. Implementations of [`MiniscriptEngine`] are injected into
//! [`DescriptorFactory`](crate::DescriptorFactory).
//!
//! The token protocol is part of the interface. Compiled ASM contains
//! whitespace-separated tokens which are either
//!
//! * `<@k>` — a push of the public key bound to variable `@k`,
//! * `<HASH160(@k)>` — a push of the HASH160 of that public key,
//! * `<hex>` — a literal push (for example a hash lock digest),
//! * an `OP_*` opcode name, or
//! * a decimal number, to be encoded as a minimal script number.
//!
//! Satisfaction ASM additionally uses `<sig(@k)>` for a signature by the
//! key bound to `@k` and `<fn_preimage(hex)>` (with `fn` one of `sha256`,
//! `hash256`, `ripemd160`, `hash160`) for a hash preimage. The satisfier
//! must only produce solutions whose tokens are drawn from the `knowns`
//! set it was given; anything else is rejected downstream by the
//! assembler's validating tokenizer.

use std::collections::BTreeSet;

use bitcoin::{absolute, Sequence};

use crate::Error;

/// Result of compiling an expanded miniscript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
    /// Expanded ASM with `<@k>` / `<HASH160(@k)>` placeholder tokens.
    pub asm: String,
    /// Whether the compiler considers the miniscript sane (consensus and
    /// standardness sound, non-malleable under the type system).
    pub sane: bool,
}

/// One non-malleable satisfaction found by the satisfier.
///
/// The `asm` uses the satisfaction token protocol described at the module
/// level. `lock_time` and `sequence` are the consensus fields the spending
/// transaction must set for this solution to verify; `None` means the
/// solution puts no constraint on the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Satisfaction template in ASM form.
    pub asm: String,
    /// Required `nLockTime`, if the solution walks through an `after(..)`.
    pub lock_time: Option<absolute::LockTime>,
    /// Required `nSequence`, if the solution walks through an `older(..)`.
    pub sequence: Option<Sequence>,
}

/// External Miniscript compiler and satisfier.
///
/// Inputs are always in expanded form: every key expression has been
/// replaced by a positional `@k` variable, so implementations never see
/// key material.
pub trait MiniscriptEngine {
    /// Compile a miniscript into expanded ASM.
    ///
    /// Implementations report malformed miniscript through
    /// [`Error::Engine`]; a well-formed but unsound miniscript is reported
    /// by returning [`Compilation::sane`] `== false`.
    fn compile(&self, miniscript: &str) -> Result<Compilation, Error>;

    /// Enumerate the non-malleable satisfactions reachable with the given
    /// `knowns`, cheapest first.
    ///
    /// `knowns` is the set of satisfaction tokens (signatures and
    /// preimages) the caller can materialize. An empty return value means
    /// the miniscript cannot be satisfied with this material.
    fn satisfy(&self, miniscript: &str, knowns: &BTreeSet<String>) -> Result<Vec<Solution>, Error>;
}
