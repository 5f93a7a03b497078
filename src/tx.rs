//! Synthetic host transactions.
//!
//! The shell only exists to give each vector a realistically shaped
//! transaction around input 0. Its other inputs and outputs are random and are
//! never spent or verified.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    secp256k1::{All, Secp256k1},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use rand::Rng;

use crate::{template::Template, vector::VectorFormat};

pub const MAX_INPUTS: usize = 4;
pub const MAX_OUTPUTS: usize = 4;
/// Output values are drawn from `[0, MAX_OUTPUT_VALUE]` satoshis.
pub const MAX_OUTPUT_VALUE: u64 = 100_000_000;
/// One in this many inputs gets a random sequence, and one in this many
/// transactions a random locktime.
pub const RARE_FIELD_ODDS: u32 = 5;

/// A transaction with at least one input, whose input 0 receives each
/// generated spend.
#[derive(Debug, Clone)]
pub struct TxShell {
    tx: Transaction,
}

impl TxShell {
    pub fn random<R: Rng + ?Sized>(rng: &mut R, secp: &Secp256k1<All>, format: VectorFormat) -> Self {
        let inputs = rng.gen_range(1..=MAX_INPUTS);
        let outputs = rng.gen_range(0..=MAX_OUTPUTS);
        let version = Version(rng.gen());

        let input: Vec<TxIn> = (0..inputs).map(|_| random_input(rng)).collect();
        let output: Vec<TxOut> = (0..outputs)
            .map(|_| random_output(rng, secp, format))
            .collect();
        let lock_time = if rng.gen_ratio(1, RARE_FIELD_ODDS) {
            LockTime::from_consensus(rng.gen())
        } else {
            LockTime::ZERO
        };

        Self {
            tx: Transaction {
                version,
                lock_time,
                input,
                output,
            },
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Overwrites input 0's script and witness, leaving everything else as is.
    pub fn install(&mut self, script_sig: ScriptBuf, witness: Witness) {
        let input = &mut self.tx.input[0];
        input.script_sig = script_sig;
        input.witness = witness;
    }
}

pub fn random_outpoint<R: Rng + ?Sized>(rng: &mut R) -> OutPoint {
    let mut txid = [0u8; 32];
    rng.fill_bytes(&mut txid);
    OutPoint {
        txid: Txid::from_byte_array(txid),
        vout: rng.gen(),
    }
}

fn random_input<R: Rng + ?Sized>(rng: &mut R) -> TxIn {
    let sequence = if rng.gen_ratio(1, RARE_FIELD_ODDS) {
        Sequence(rng.gen())
    } else {
        Sequence::MAX
    };
    TxIn {
        previous_output: random_outpoint(rng),
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

fn random_output<R: Rng + ?Sized>(rng: &mut R, secp: &Secp256k1<All>, format: VectorFormat) -> TxOut {
    TxOut {
        value: Amount::from_sat(rng.gen_range(0..=MAX_OUTPUT_VALUE)),
        script_pubkey: Template::random_for(format, rng, secp).output_script(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn shells_respect_shape_limits() {
        let secp = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let shell = TxShell::random(&mut rng, &secp, VectorFormat::Witness);
            let tx = shell.transaction();
            assert!((1..=MAX_INPUTS).contains(&tx.input.len()));
            assert!(tx.output.len() <= MAX_OUTPUTS);
            assert!(tx
                .output
                .iter()
                .all(|out| out.value.to_sat() <= MAX_OUTPUT_VALUE));
        }
    }

    #[test]
    fn install_only_touches_input_zero() {
        let secp = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(9);
        let mut shell = loop {
            let shell = TxShell::random(&mut rng, &secp, VectorFormat::Legacy);
            if shell.transaction().input.len() > 1 {
                break shell;
            }
        };
        let before = shell.transaction().clone();
        let script = ScriptBuf::from_bytes(vec![0x51]);
        let witness = Witness::from_slice(&[vec![1u8, 2, 3]]);
        shell.install(script.clone(), witness.clone());

        let after = shell.transaction();
        assert_eq!(after.input[0].script_sig, script);
        assert_eq!(after.input[0].witness, witness);
        assert_eq!(after.input[0].previous_output, before.input[0].previous_output);
        assert_eq!(after.input[1..], before.input[1..]);
        assert_eq!(after.output, before.output);
    }

    #[test]
    fn legacy_shells_serialize_without_witness_marker() {
        let secp = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(4);
        let shell = TxShell::random(&mut rng, &secp, VectorFormat::Legacy);
        let bytes = consensus::serialize(shell.transaction());
        let decoded: Transaction = consensus::deserialize(&bytes).expect("round trip");
        assert_eq!(&decoded, shell.transaction());
        assert_eq!(bytes.len(), shell.transaction().base_size());
    }
}
