// SPDX-License-Identifier: CC0-1.0

//! Descriptor checksum
//!
//! The 8-character checksum trailing a descriptor string, as specified in
//! [BIP-380] and computed by Bitcoin Core. The 40-bit polynomial is driven
//! through the `bech32` checksum machinery; on top of the 5-bit symbol
//! class of every character, groups of three characters fold their 3-bit
//! group class into an extra symbol, so that the checksum commits to the
//! full character values.
//!
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

use std::convert::TryFrom;
use std::iter::FromIterator;

use bech32::primitives::checksum::PackedFe32;
use bech32::{Checksum, Fe32};

use crate::Error;

const CHECKSUM_LENGTH: usize = 8;
const CODE_LENGTH: usize = 32767;

/// Character set of descriptor payloads; a character's index is its
/// checksum value.
pub const INPUT_CHARSET: &str = "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";

/// Compute the checksum of a descriptor payload.
///
/// The payload is checksummed as given: wildcard substitution and shape
/// dispatch happen after, and independently of, this computation. No
/// grammar check is performed here.
pub fn checksum(desc: &str) -> Result<String, Error> {
    let mut eng = Engine::new();
    eng.input(desc)?;
    Ok(eng.checksum())
}

/// Split a trailing `#checksum` off a descriptor expression.
///
/// A present checksum is verified against the payload; an absent one is an
/// error when `required` is set. Returns the payload without the checksum.
pub(crate) fn strip_checksum(s: &str, required: bool) -> Result<&str, Error> {
    for ch in s.as_bytes() {
        if *ch < 20 || *ch > 127 {
            return Err(Error::Unprintable(*ch));
        }
    }

    let mut parts = s.splitn(2, '#');
    let desc_str = parts.next().expect("splitn always yields one part");
    match parts.next() {
        Some(actual) => {
            let expected = checksum(desc_str)?;
            if actual != expected {
                return Err(Error::BadChecksum {
                    actual: actual.to_owned(),
                    expected,
                });
            }
            Ok(desc_str)
        }
        None if required => Err(Error::MissingChecksum),
        None => Ok(desc_str),
    }
}

/// Rolling checksum engine.
struct Engine {
    inner: bech32::primitives::checksum::Engine<DescriptorChecksum>,
    cls: u64,
    clscount: u64,
}

impl Engine {
    fn new() -> Self {
        Engine {
            inner: bech32::primitives::checksum::Engine::new(),
            cls: 0,
            clscount: 0,
        }
    }

    fn input(&mut self, s: &str) -> Result<(), Error> {
        for ch in s.chars() {
            let pos = INPUT_CHARSET
                .find(ch)
                .ok_or(Error::Unprintable(ch as u8))? as u64;

            let fe = Fe32::try_from(pos & 31).expect("masked to 5 bits");
            self.inner.input_fe(fe);

            self.cls = self.cls * 3 + (pos >> 5);
            self.clscount += 1;
            if self.clscount == 3 {
                // Group class of 3 characters fits a single symbol.
                let fe = Fe32::try_from(self.cls).expect("3 group classes fit 5 bits");
                self.inner.input_fe(fe);
                self.cls = 0;
                self.clscount = 0;
            }
        }
        Ok(())
    }

    fn checksum_chars(&mut self) -> [char; CHECKSUM_LENGTH] {
        if self.clscount > 0 {
            let fe = Fe32::try_from(self.cls).expect("partial group class fits 5 bits");
            self.inner.input_fe(fe);
        }
        self.inner.input_target_residue();

        let mut chars = [0 as char; CHECKSUM_LENGTH];
        let mut checksum_remaining = CHECKSUM_LENGTH;

        for checksum_ch in &mut chars {
            checksum_remaining -= 1;
            let unpacked = self.inner.residue().unpack(checksum_remaining);
            let fe = Fe32::try_from(unpacked).expect("5 bits fits in an fe32");
            *checksum_ch = fe.to_char();
        }
        chars
    }

    fn checksum(&mut self) -> String {
        String::from_iter(self.checksum_chars().iter().copied())
    }
}

/// The descriptor checksum algorithm of [BIP-380].
///
/// [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum DescriptorChecksum {}

/// Generator coefficients, taken from BIP-380.
#[rustfmt::skip]
const GEN: [u64; 5] = [0xf5dee51989, 0xa9fdca3312, 0x1bab10e32d, 0x3706b1677a, 0x644d626ffd];

impl Checksum for DescriptorChecksum {
    type MidstateRepr = u64; // We need 40 bits (8 * 5).
    const CHECKSUM_LENGTH: usize = CHECKSUM_LENGTH;
    const CODE_LENGTH: usize = CODE_LENGTH;
    const GENERATOR_SH: [u64; 5] = GEN;
    const TARGET_RESIDUE: u64 = 1;
}
