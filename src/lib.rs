//! Differential fuzzing harness for Bitcoin script verifiers.
//!
//! The crate has two halves. The generator ([`generate`]) synthesizes random
//! but realistic spends across the standard spending templates ([`template`])
//! and stores each one as a content-addressed [`vector::TestVector`] file. The
//! executor ([`executor`]) replays a directory of those files through two
//! independent [`adapter::Verifier`]s and reports every vector on which their
//! verdicts differ.

pub mod adapter;
pub mod executor;
pub mod fuzz;
pub mod generate;
#[cfg(feature = "libconsensus")]
pub mod libconsensus;
pub mod template;
pub mod tx;
pub mod vector;

pub use adapter::{AdapterError, CommandAdapter, InProcessAdapter, Verifier};
pub use executor::{ExecuteError, Executor, ExecutorConfig, Mismatch, Report};
pub use generate::{GenerateError, GenerateStats, Generator, GeneratorConfig, Mode};
pub use template::{Template, TemplateError, TemplateKind, VerificationContext};
pub use vector::{Stored, TestVector, VectorError, VectorFormat};

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict ECDSA encoding (BIP62).
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require signatures to use low-S form (BIP62).
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Enforce NULLDUMMY (BIP147).
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require minimal data encodings (BIP62).
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Discourage use of upgradable NOP opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Enable WITNESS (BIP141).
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Discourage unknown witness program versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 12;
/// Require minimal encodings for IF/NOTIF.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Enforce NULLFAIL behaviour (BIP147).
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Require compressed pubkeys in segwit v0 contexts.
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;

/// Flags every block must satisfy.
pub const MANDATORY_VERIFY_FLAGS: u32 = VERIFY_P2SH;

/// Flags enforced by relay policy on top of the mandatory set.
pub const STANDARD_VERIFY_FLAGS: u32 = MANDATORY_VERIFY_FLAGS
    | VERIFY_DERSIG
    | VERIFY_STRICTENC
    | VERIFY_MINIMALDATA
    | VERIFY_NULLDUMMY
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEANSTACK
    | VERIFY_MINIMALIF
    | VERIFY_NULLFAIL
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_LOW_S
    | VERIFY_WITNESS
    | VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    | VERIFY_WITNESS_PUBKEYTYPE;

const WITNESS_ONLY_FLAGS: u32 =
    VERIFY_WITNESS | VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM | VERIFY_WITNESS_PUBKEYTYPE;

/// The verification flag set a generation run stamps on every vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSet {
    Mandatory,
    Standard,
}

impl FlagSet {
    pub fn from_standard(standard: bool) -> Self {
        if standard {
            FlagSet::Standard
        } else {
            FlagSet::Mandatory
        }
    }

    /// Concrete flag bits for vectors written in `format`.
    ///
    /// Pre-witness vectors target verifiers that predate BIP141, so the
    /// witness bits are never set for them.
    pub fn bits(self, format: VectorFormat) -> u32 {
        match (self, format) {
            (FlagSet::Mandatory, VectorFormat::Witness) => MANDATORY_VERIFY_FLAGS | VERIFY_WITNESS,
            (FlagSet::Mandatory, VectorFormat::Legacy) => MANDATORY_VERIFY_FLAGS,
            (FlagSet::Standard, VectorFormat::Witness) => STANDARD_VERIFY_FLAGS,
            (FlagSet::Standard, VectorFormat::Legacy) => STANDARD_VERIFY_FLAGS & !WITNESS_ONLY_FLAGS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_flags_gain_witness_only_in_witness_format() {
        assert_eq!(FlagSet::Mandatory.bits(VectorFormat::Legacy), VERIFY_P2SH);
        assert_eq!(
            FlagSet::Mandatory.bits(VectorFormat::Witness),
            VERIFY_P2SH | VERIFY_WITNESS
        );
    }

    #[test]
    fn standard_flags_are_a_superset_of_mandatory() {
        for format in [VectorFormat::Legacy, VectorFormat::Witness] {
            let standard = FlagSet::Standard.bits(format);
            let mandatory = FlagSet::Mandatory.bits(format);
            assert_eq!(standard & mandatory, mandatory, "{format:?}");
        }
        assert_eq!(FlagSet::Standard.bits(VectorFormat::Legacy) & WITNESS_ONLY_FLAGS, 0);
    }

    #[test]
    fn witness_implies_p2sh_in_every_set() {
        for set in [FlagSet::Mandatory, FlagSet::Standard] {
            for format in [VectorFormat::Legacy, VectorFormat::Witness] {
                let flags = set.bits(format);
                if flags & VERIFY_WITNESS != 0 {
                    assert!(flags & VERIFY_P2SH != 0);
                }
            }
        }
    }
}
