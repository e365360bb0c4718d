// SPDX-License-Identifier: CC0-1.0

//! Script assembly
//!
//! The engine talks in ASM: whitespace-separated opcode names, decimal
//! numbers and `<...>` push tokens. This module substitutes key variables
//! into that ASM and encodes it into canonical script bytes. Numbers are
//! encoded as minimal little-endian signed script numbers (zero is the
//! empty push, handled by the small-number opcodes). The tokenizer is
//! validating: a `<...>` token still carrying a variable or a call site is
//! rejected instead of being encoded.

use std::convert::TryFrom;

use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::blockdata::opcodes::Opcode;
use bitcoin::blockdata::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::hex::FromHex;

use crate::miniscript::ExpansionMap;
use crate::Error;

/// Largest redeem script a P2SH output can be spent with.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Largest standard P2WSH witness script.
pub const MAX_STANDARD_P2WSH_SCRIPT_SIZE: usize = 3600;
/// Maximum number of non-push opcodes per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Replace `<@k>` and `<HASH160(@k)>` tokens by the hex of the bound
/// public key, respectively its HASH160.
pub(crate) fn substitute_keys(asm: &str, map: &ExpansionMap) -> String {
    let mut out = asm.to_owned();
    for (k, _, info) in map.iter() {
        let pubkey_hex = info.pubkey().to_string();
        let hash = hash160::Hash::hash(&info.pubkey().to_bytes());
        out = out.replace(&format!("<@{}>", k), &format!("<{}>", pubkey_hex));
        out = out.replace(&format!("<HASH160(@{})>", k), &format!("<{}>", hash));
    }
    out
}

/// Encode ASM into script bytes.
pub(crate) fn script_from_asm(asm: &str) -> Result<ScriptBuf, Error> {
    let mut builder = Builder::new();
    for token in asm.split_whitespace() {
        if let Some(inner) = token
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
        {
            if inner.contains('@') || inner.contains('(') {
                return Err(Error::UnsubstitutedVariable(token.to_owned()));
            }
            let bytes = Vec::<u8>::from_hex(inner)
                .map_err(|_| Error::UnknownAsmToken(token.to_owned()))?;
            let push = PushBytesBuf::try_from(bytes)
                .map_err(|_| Error::UnknownAsmToken(token.to_owned()))?;
            builder = builder.push_slice(push);
        } else if let Some(opcode) = opcode_by_name(token) {
            builder = builder.push_opcode(opcode);
        } else if let Ok(n) = token.parse::<i64>() {
            builder = builder.push_int(n);
        } else {
            return Err(Error::UnknownAsmToken(token.to_owned()));
        }
    }
    Ok(builder.into_script())
}

/// Number of non-push opcodes (anything above `OP_16`).
pub(crate) fn count_non_push_ops(script: &Script) -> Result<usize, Error> {
    let mut count = 0;
    for instruction in script.instructions() {
        if let Instruction::Op(op) = instruction? {
            if op.to_u8() > opcodes::OP_PUSHNUM_16.to_u8() {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// The opcode vocabulary a compiled miniscript or its satisfaction can
/// contain, plus the aliases Bitcoin Core prints for the timelock checks.
fn opcode_by_name(name: &str) -> Option<Opcode> {
    Some(match name {
        "OP_0" | "OP_FALSE" => opcodes::OP_PUSHBYTES_0,
        "OP_1" | "OP_TRUE" => opcodes::OP_PUSHNUM_1,
        "OP_2" => opcodes::OP_PUSHNUM_2,
        "OP_3" => opcodes::OP_PUSHNUM_3,
        "OP_4" => opcodes::OP_PUSHNUM_4,
        "OP_5" => opcodes::OP_PUSHNUM_5,
        "OP_6" => opcodes::OP_PUSHNUM_6,
        "OP_7" => opcodes::OP_PUSHNUM_7,
        "OP_8" => opcodes::OP_PUSHNUM_8,
        "OP_9" => opcodes::OP_PUSHNUM_9,
        "OP_10" => opcodes::OP_PUSHNUM_10,
        "OP_11" => opcodes::OP_PUSHNUM_11,
        "OP_12" => opcodes::OP_PUSHNUM_12,
        "OP_13" => opcodes::OP_PUSHNUM_13,
        "OP_14" => opcodes::OP_PUSHNUM_14,
        "OP_15" => opcodes::OP_PUSHNUM_15,
        "OP_16" => opcodes::OP_PUSHNUM_16,
        "OP_1NEGATE" => opcodes::OP_PUSHNUM_NEG1,
        "OP_VERIFY" => opcodes::OP_VERIFY,
        "OP_IF" => opcodes::OP_IF,
        "OP_NOTIF" => opcodes::OP_NOTIF,
        "OP_ELSE" => opcodes::OP_ELSE,
        "OP_ENDIF" => opcodes::OP_ENDIF,
        "OP_IFDUP" => opcodes::OP_IFDUP,
        "OP_DUP" => opcodes::OP_DUP,
        "OP_DROP" => opcodes::OP_DROP,
        "OP_SWAP" => opcodes::OP_SWAP,
        "OP_SIZE" => opcodes::OP_SIZE,
        "OP_TOALTSTACK" => opcodes::OP_TOALTSTACK,
        "OP_FROMALTSTACK" => opcodes::OP_FROMALTSTACK,
        "OP_EQUAL" => opcodes::OP_EQUAL,
        "OP_EQUALVERIFY" => opcodes::OP_EQUALVERIFY,
        "OP_ADD" => opcodes::OP_ADD,
        "OP_BOOLAND" => opcodes::OP_BOOLAND,
        "OP_BOOLOR" => opcodes::OP_BOOLOR,
        "OP_NOT" => opcodes::OP_NOT,
        "OP_0NOTEQUAL" => opcodes::OP_0NOTEQUAL,
        "OP_RIPEMD160" => opcodes::OP_RIPEMD160,
        "OP_SHA256" => opcodes::OP_SHA256,
        "OP_HASH160" => opcodes::OP_HASH160,
        "OP_HASH256" => opcodes::OP_HASH256,
        "OP_CHECKSIG" => opcodes::OP_CHECKSIG,
        "OP_CHECKSIGVERIFY" => opcodes::OP_CHECKSIGVERIFY,
        "OP_CHECKMULTISIG" => opcodes::OP_CHECKMULTISIG,
        "OP_CHECKMULTISIGVERIFY" => opcodes::OP_CHECKMULTISIGVERIFY,
        "OP_CHECKLOCKTIMEVERIFY" | "OP_CLTV" => opcodes::OP_CLTV,
        "OP_CHECKSEQUENCEVERIFY" | "OP_CSV" => opcodes::OP_CSV,
        _ => return None,
    })
}
