//! Unstructured scripts for robustness fuzzing.
//!
//! Nothing here tries to be spendable. Input scripts are at least push-only so
//! the transaction stays relay-shaped, while output scripts are raw byte blobs
//! that are usually not even parseable.

use bitcoin::{ScriptBuf, Witness};
use rand::Rng;

use crate::template::{push_script, TemplateError};

pub const MAX_INPUT_PUSHES: usize = 20;
pub const MAX_PUSH_LEN: usize = 80;
pub const MAX_OUTPUT_SCRIPT_LEN: usize = 1_000;
pub const MAX_WITNESS_ITEMS: usize = 6;
/// One in this many unstructured vectors gets a well-formed template output.
pub const TEMPLATE_OUTPUT_ODDS: u32 = 16;

pub fn random_bytes<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Between zero and `max_items` items of at most `max_len` bytes each.
pub fn random_items<R: Rng + ?Sized>(rng: &mut R, max_items: usize, max_len: usize) -> Vec<Vec<u8>> {
    let count = rng.gen_range(0..=max_items);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(0..=max_len);
            random_bytes(rng, len)
        })
        .collect()
}

pub fn random_input_script<R: Rng + ?Sized>(rng: &mut R) -> Result<ScriptBuf, TemplateError> {
    let count = rng.gen_range(1..=MAX_INPUT_PUSHES);
    let items: Vec<Vec<u8>> = (0..count)
        .map(|_| {
            let len = rng.gen_range(0..=MAX_PUSH_LEN);
            random_bytes(rng, len)
        })
        .collect();
    push_script(&items)
}

pub fn random_output_script<R: Rng + ?Sized>(rng: &mut R) -> ScriptBuf {
    let len = rng.gen_range(1..=MAX_OUTPUT_SCRIPT_LEN);
    ScriptBuf::from_bytes(random_bytes(rng, len))
}

pub fn random_witness<R: Rng + ?Sized>(rng: &mut R) -> Witness {
    Witness::from_slice(&random_items(rng, MAX_WITNESS_ITEMS, MAX_PUSH_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::script::Instruction;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn input_scripts_are_push_only() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..32 {
            let script = random_input_script(&mut rng).expect("script");
            let count = script
                .instructions()
                .map(|ins| match ins.expect("parse") {
                    Instruction::PushBytes(bytes) => assert!(bytes.len() <= MAX_PUSH_LEN),
                    Instruction::Op(op) => panic!("unexpected {op:?}"),
                })
                .count();
            assert!((1..=MAX_INPUT_PUSHES).contains(&count));
        }
    }

    #[test]
    fn output_scripts_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..32 {
            let script = random_output_script(&mut rng);
            assert!((1..=MAX_OUTPUT_SCRIPT_LEN).contains(&script.len()));
        }
    }

    #[test]
    fn witness_item_count_is_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..32 {
            assert!(random_witness(&mut rng).len() <= MAX_WITNESS_ITEMS);
        }
    }
}
