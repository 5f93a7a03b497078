//! Reference verifier backed by libbitcoinconsensus.

use tracing::debug;

use crate::{
    adapter::{InProcessAdapter, Verifier},
    vector::TestVector,
    VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_DERSIG, VERIFY_NULLDUMMY,
    VERIFY_P2SH, VERIFY_WITNESS,
};

/// Flags the library accepts; it rejects any call carrying other bits, so
/// policy-only flags are dropped before the call.
pub const SUPPORTED_FLAGS: u32 = VERIFY_P2SH
    | VERIFY_DERSIG
    | VERIFY_NULLDUMMY
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS;

pub const LABEL: &str = "libbitcoinconsensus";

/// Whether the vector's target input validly spends its output script.
pub fn verify_vector(vector: &TestVector) -> bool {
    let tx = match vector.spending_transaction() {
        Ok(tx) => tx,
        Err(err) => {
            debug!(%err, "unusable transaction");
            return false;
        }
    };
    let result = bitcoinconsensus::verify_with_flags(
        vector.output_script.as_bytes(),
        vector.value,
        &tx,
        None,
        vector.input_index as usize,
        vector.flags & SUPPORTED_FLAGS,
    );
    if let Err(err) = &result {
        debug!(?err, "script rejected");
    }
    result.is_ok()
}

pub fn adapter() -> impl Verifier {
    InProcessAdapter::new(LABEL, verify_vector)
}
