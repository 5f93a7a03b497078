//! Spending templates and the verification contexts that satisfy them.
//!
//! Every template derives an output script from its own parameters and can
//! produce the input script / witness that spends it. Key-based templates
//! carry real key pairs, so the signatures they produce commit to the host
//! transaction exactly as a wallet's would.

use bitcoin::{
    blockdata::script::{Builder, PushBytes, PushBytesError},
    hashes::Hash,
    opcodes::all,
    secp256k1::{self, All, Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SegwitV0Sighash, SighashCache},
    Amount, PublicKey, Script, ScriptBuf, Transaction, WPubkeyHash, Witness,
};
use rand::Rng;
use thiserror::Error;

use crate::{fuzz, vector::VectorFormat};

/// Upper bound on multisig participants (`OP_16`).
pub const MAX_MULTISIG_KEYS: usize = 16;
/// Bare multisig with more keys than this no longer fits one 520-byte push,
/// which a P2SH redeem script has to.
pub const MAX_P2SH_MULTISIG_KEYS: usize = 15;

pub const MIN_WITNESS_VERSION: u8 = 1;
pub const MAX_WITNESS_VERSION: u8 = 16;
pub const MIN_WITNESS_PROGRAM_LEN: usize = 2;
pub const MAX_WITNESS_PROGRAM_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{0:?} cannot be wrapped by a hash-based template")]
    NotNestable(TemplateKind),
    #[error("invalid witness program: version {version}, {len} bytes")]
    WitnessProgram { version: u8, len: usize },
    #[error("signature hash failed: {0}")]
    Sighash(String),
    #[error(transparent)]
    Push(#[from] PushBytesError),
}

/// Selector for a [`Template`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    PlainKey,
    KeyHash,
    Multisig,
    ScriptHash,
    WitnessKeyHash,
    WitnessScriptHash,
    WitnessProgram,
    NestedWitnessScriptHash,
}

impl TemplateKind {
    /// Templates a pre-witness verifier understands.
    pub const LEGACY: [TemplateKind; 4] = [
        TemplateKind::PlainKey,
        TemplateKind::KeyHash,
        TemplateKind::Multisig,
        TemplateKind::ScriptHash,
    ];

    pub const ALL: [TemplateKind; 8] = [
        TemplateKind::PlainKey,
        TemplateKind::KeyHash,
        TemplateKind::Multisig,
        TemplateKind::ScriptHash,
        TemplateKind::WitnessKeyHash,
        TemplateKind::WitnessScriptHash,
        TemplateKind::WitnessProgram,
        TemplateKind::NestedWitnessScriptHash,
    ];

    /// Templates that may sit inside a script-hash or witness-script-hash.
    pub const LEAVES: [TemplateKind; 3] = [
        TemplateKind::PlainKey,
        TemplateKind::KeyHash,
        TemplateKind::Multisig,
    ];

    pub fn enabled(format: VectorFormat) -> &'static [TemplateKind] {
        match format {
            VectorFormat::Legacy => &Self::LEGACY,
            VectorFormat::Witness => &Self::ALL,
        }
    }
}

/// Where a leaf template is going to be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    ScriptHash,
    WitnessScript,
}

/// A secp256k1 key pair.
#[derive(Debug, Clone)]
pub struct Key {
    secret: SecretKey,
    public: PublicKey,
}

impl Key {
    pub fn random<R: Rng + ?Sized>(rng: &mut R, secp: &Secp256k1<All>, compressed: bool) -> Self {
        let secret = loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                break secret;
            }
        };
        let inner = secp256k1::PublicKey::from_secret_key(secp, &secret);
        let public = if compressed {
            PublicKey::new(inner)
        } else {
            PublicKey::new_uncompressed(inner)
        };
        Self { secret, public }
    }
}

/// Signature hashing scheme a script is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    Base,
    WitnessV0,
}

/// Everything a signature commits to besides the script code.
pub struct Signing<'a> {
    secp: &'a Secp256k1<All>,
    tx: &'a Transaction,
    input_index: usize,
    value: Amount,
}

impl<'a> Signing<'a> {
    pub fn new(
        secp: &'a Secp256k1<All>,
        tx: &'a Transaction,
        input_index: usize,
        value: Amount,
    ) -> Self {
        Self {
            secp,
            tx,
            input_index,
            value,
        }
    }

    pub fn value(&self) -> Amount {
        self.value
    }

    /// DER signature with a trailing `SIGHASH_ALL` byte.
    pub fn sign(
        &self,
        key: &Key,
        script_code: &Script,
        version: SigVersion,
    ) -> Result<Vec<u8>, TemplateError> {
        let digest = match version {
            SigVersion::Base => SighashCache::new(self.tx)
                .legacy_signature_hash(
                    self.input_index,
                    script_code,
                    EcdsaSighashType::All.to_u32(),
                )
                .map_err(|err| TemplateError::Sighash(err.to_string()))?
                .to_byte_array(),
            SigVersion::WitnessV0 => {
                let mut cache = SighashCache::new(self.tx);
                let mut engine = SegwitV0Sighash::engine();
                cache
                    .segwit_v0_encode_signing_data_to(
                        &mut engine,
                        self.input_index,
                        script_code,
                        self.value,
                        EcdsaSighashType::All,
                    )
                    .map_err(|err| TemplateError::Sighash(err.to_string()))?;
                SegwitV0Sighash::from_engine(engine).to_byte_array()
            }
        };
        let signature = self
            .secp
            .sign_ecdsa(&Message::from_digest(digest), &key.secret);
        let mut bytes = signature.serialize_der().to_vec();
        bytes.push(EcdsaSighashType::All.to_u32() as u8);
        Ok(bytes)
    }
}

/// One concrete spend: the input data, the output it unlocks and, for
/// hash-based templates, the script whose hash the output commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContext {
    pub input_script: ScriptBuf,
    pub witness: Witness,
    pub output_script: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
    pub value: Amount,
}

#[derive(Debug, Clone)]
pub enum Template {
    PlainKey(Key),
    KeyHash(Key),
    Multisig { required: usize, keys: Vec<Key> },
    ScriptHash(Box<Template>),
    WitnessKeyHash(Key),
    WitnessScriptHash(Box<Template>),
    WitnessProgram { script: ScriptBuf, stack: Vec<Vec<u8>> },
    NestedWitnessScriptHash(Box<Template>),
}

impl Template {
    /// Picks a variant uniformly from the set enabled for `format`.
    pub fn random_for<R: Rng + ?Sized>(
        format: VectorFormat,
        rng: &mut R,
        secp: &Secp256k1<All>,
    ) -> Self {
        let kinds = TemplateKind::enabled(format);
        let kind = kinds[rng.gen_range(0..kinds.len())];
        Self::random(kind, rng, secp)
    }

    pub fn random<R: Rng + ?Sized>(kind: TemplateKind, rng: &mut R, secp: &Secp256k1<All>) -> Self {
        match kind {
            TemplateKind::PlainKey => {
                let compressed = rng.gen();
                Template::PlainKey(Key::random(rng, secp, compressed))
            }
            TemplateKind::KeyHash => {
                let compressed = rng.gen();
                Template::KeyHash(Key::random(rng, secp, compressed))
            }
            TemplateKind::Multisig => random_multisig(rng, secp, MAX_MULTISIG_KEYS, None),
            TemplateKind::ScriptHash => {
                Template::ScriptHash(Box::new(random_leaf(rng, secp, Placement::ScriptHash)))
            }
            TemplateKind::WitnessKeyHash => Template::WitnessKeyHash(Key::random(rng, secp, true)),
            TemplateKind::WitnessScriptHash => Template::WitnessScriptHash(Box::new(random_leaf(
                rng,
                secp,
                Placement::WitnessScript,
            ))),
            TemplateKind::WitnessProgram => {
                let version = rng.gen_range(MIN_WITNESS_VERSION..=MAX_WITNESS_VERSION);
                let len = rng.gen_range(MIN_WITNESS_PROGRAM_LEN..=MAX_WITNESS_PROGRAM_LEN);
                let program = fuzz::random_bytes(rng, len);
                let stack = fuzz::random_items(rng, fuzz::MAX_WITNESS_ITEMS, fuzz::MAX_PUSH_LEN);
                let script = witness_program_script(version, &program);
                Template::WitnessProgram { script, stack }
            }
            TemplateKind::NestedWitnessScriptHash => Template::NestedWitnessScriptHash(Box::new(
                random_leaf(rng, secp, Placement::WitnessScript),
            )),
        }
    }

    /// Bare witness program of an explicit shape.
    pub fn witness_program(
        version: u8,
        program: &[u8],
        stack: Vec<Vec<u8>>,
    ) -> Result<Self, TemplateError> {
        if !(MIN_WITNESS_VERSION..=MAX_WITNESS_VERSION).contains(&version)
            || !(MIN_WITNESS_PROGRAM_LEN..=MAX_WITNESS_PROGRAM_LEN).contains(&program.len())
        {
            return Err(TemplateError::WitnessProgram {
                version,
                len: program.len(),
            });
        }
        Ok(Template::WitnessProgram {
            script: witness_program_script(version, program),
            stack,
        })
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            Template::PlainKey(_) => TemplateKind::PlainKey,
            Template::KeyHash(_) => TemplateKind::KeyHash,
            Template::Multisig { .. } => TemplateKind::Multisig,
            Template::ScriptHash(_) => TemplateKind::ScriptHash,
            Template::WitnessKeyHash(_) => TemplateKind::WitnessKeyHash,
            Template::WitnessScriptHash(_) => TemplateKind::WitnessScriptHash,
            Template::WitnessProgram { .. } => TemplateKind::WitnessProgram,
            Template::NestedWitnessScriptHash(_) => TemplateKind::NestedWitnessScriptHash,
        }
    }

    /// `(m, n)` for multisig templates.
    pub fn multisig_bounds(&self) -> Option<(usize, usize)> {
        match self {
            Template::Multisig { required, keys } => Some((*required, keys.len())),
            _ => None,
        }
    }

    /// The wrapped template of a hash-based variant.
    pub fn inner(&self) -> Option<&Template> {
        match self {
            Template::ScriptHash(inner)
            | Template::WitnessScriptHash(inner)
            | Template::NestedWitnessScriptHash(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn output_script(&self) -> ScriptBuf {
        match self {
            Template::PlainKey(key) => ScriptBuf::new_p2pk(&key.public),
            Template::KeyHash(key) => ScriptBuf::new_p2pkh(&key.public.pubkey_hash()),
            Template::Multisig { required, keys } => {
                let mut builder = Builder::new().push_int(*required as i64);
                for key in keys {
                    builder = builder.push_key(&key.public);
                }
                builder
                    .push_int(keys.len() as i64)
                    .push_opcode(all::OP_CHECKMULTISIG)
                    .into_script()
            }
            Template::ScriptHash(inner) => ScriptBuf::new_p2sh(&inner.output_script().script_hash()),
            Template::WitnessKeyHash(key) => {
                ScriptBuf::new_p2wpkh(&WPubkeyHash::hash(&key.public.to_bytes()))
            }
            Template::WitnessScriptHash(inner) => {
                ScriptBuf::new_p2wsh(&inner.output_script().wscript_hash())
            }
            Template::WitnessProgram { script, .. } => script.clone(),
            Template::NestedWitnessScriptHash(inner) => {
                let redeem = ScriptBuf::new_p2wsh(&inner.output_script().wscript_hash());
                ScriptBuf::new_p2sh(&redeem.script_hash())
            }
        }
    }

    /// The script the output commits to by hash. For the nested variant this
    /// is the P2SH redeem script (the witness program), not the witness script.
    pub fn redeem_script(&self) -> Option<ScriptBuf> {
        match self {
            Template::ScriptHash(inner) | Template::WitnessScriptHash(inner) => {
                Some(inner.output_script())
            }
            Template::NestedWitnessScriptHash(inner) => Some(ScriptBuf::new_p2wsh(
                &inner.output_script().wscript_hash(),
            )),
            _ => None,
        }
    }

    /// Builds the input script and witness spending this template's output.
    pub fn context(&self, signing: &Signing<'_>) -> Result<VerificationContext, TemplateError> {
        let output_script = self.output_script();
        let (input_script, witness) = match self {
            Template::PlainKey(_) | Template::KeyHash(_) | Template::Multisig { .. } => {
                let stack = self.leaf_stack(signing, &output_script, SigVersion::Base)?;
                (push_script(&stack)?, Witness::new())
            }
            Template::ScriptHash(inner) => {
                let redeem = inner.output_script();
                let mut stack = inner.leaf_stack(signing, &redeem, SigVersion::Base)?;
                stack.push(redeem.to_bytes());
                (push_script(&stack)?, Witness::new())
            }
            Template::WitnessKeyHash(key) => {
                let script_code = ScriptBuf::new_p2pkh(&key.public.pubkey_hash());
                let signature = signing.sign(key, &script_code, SigVersion::WitnessV0)?;
                let stack = [signature, key.public.to_bytes()];
                (ScriptBuf::new(), Witness::from_slice(&stack))
            }
            Template::WitnessScriptHash(inner) => {
                (ScriptBuf::new(), witness_script_stack(inner, signing)?)
            }
            Template::WitnessProgram { stack, .. } => (ScriptBuf::new(), Witness::from_slice(stack)),
            Template::NestedWitnessScriptHash(inner) => {
                let redeem = ScriptBuf::new_p2wsh(&inner.output_script().wscript_hash());
                (
                    push_script(&[redeem.to_bytes()])?,
                    witness_script_stack(inner, signing)?,
                )
            }
        };
        Ok(VerificationContext {
            input_script,
            witness,
            output_script,
            redeem_script: self.redeem_script(),
            value: signing.value(),
        })
    }

    /// Stack items satisfying a leaf template evaluated with `script_code`.
    fn leaf_stack(
        &self,
        signing: &Signing<'_>,
        script_code: &Script,
        version: SigVersion,
    ) -> Result<Vec<Vec<u8>>, TemplateError> {
        match self {
            Template::PlainKey(key) => Ok(vec![signing.sign(key, script_code, version)?]),
            Template::KeyHash(key) => Ok(vec![
                signing.sign(key, script_code, version)?,
                key.public.to_bytes(),
            ]),
            Template::Multisig { required, keys } => {
                // CHECKMULTISIG pops one extra element; NULLDUMMY wants it empty.
                let mut stack = vec![Vec::new()];
                for key in keys.iter().take(*required) {
                    stack.push(signing.sign(key, script_code, version)?);
                }
                Ok(stack)
            }
            other => Err(TemplateError::NotNestable(other.kind())),
        }
    }
}

fn witness_script_stack(inner: &Template, signing: &Signing<'_>) -> Result<Witness, TemplateError> {
    let witness_script = inner.output_script();
    let mut stack = inner.leaf_stack(signing, &witness_script, SigVersion::WitnessV0)?;
    stack.push(witness_script.to_bytes());
    Ok(Witness::from_slice(&stack))
}

fn random_leaf<R: Rng + ?Sized>(rng: &mut R, secp: &Secp256k1<All>, placement: Placement) -> Template {
    let kind = TemplateKind::LEAVES[rng.gen_range(0..TemplateKind::LEAVES.len())];
    let compressed = match placement {
        Placement::ScriptHash => rng.gen(),
        Placement::WitnessScript => true,
    };
    match kind {
        TemplateKind::PlainKey => Template::PlainKey(Key::random(rng, secp, compressed)),
        TemplateKind::KeyHash => Template::KeyHash(Key::random(rng, secp, compressed)),
        _ => match placement {
            Placement::ScriptHash => random_multisig(rng, secp, MAX_P2SH_MULTISIG_KEYS, Some(true)),
            Placement::WitnessScript => random_multisig(rng, secp, MAX_MULTISIG_KEYS, Some(true)),
        },
    }
}

/// `n` uniform in `[1, max_keys]`, then `m` uniform in `[1, n]`.
fn random_multisig<R: Rng + ?Sized>(
    rng: &mut R,
    secp: &Secp256k1<All>,
    max_keys: usize,
    compressed: Option<bool>,
) -> Template {
    let total = rng.gen_range(1..=max_keys);
    let required = rng.gen_range(1..=total);
    let mut keys = Vec::with_capacity(total);
    for _ in 0..total {
        let compressed = match compressed {
            Some(compressed) => compressed,
            None => rng.gen(),
        };
        keys.push(Key::random(rng, secp, compressed));
    }
    Template::Multisig { required, keys }
}

fn witness_program_script(version: u8, program: &[u8]) -> ScriptBuf {
    // Versions 1..=16 map onto OP_1..OP_16.
    let mut bytes = Vec::with_capacity(program.len() + 2);
    bytes.push(all::OP_PUSHNUM_1.to_u8() + version - 1);
    bytes.push(program.len() as u8);
    bytes.extend_from_slice(program);
    ScriptBuf::from_bytes(bytes)
}

/// Push-only script pushing each item in order.
pub fn push_script<T: AsRef<[u8]>>(items: &[T]) -> Result<ScriptBuf, TemplateError> {
    let mut builder = Builder::new();
    for item in items {
        let push: &PushBytes = item.as_ref().try_into()?;
        builder = builder.push_slice(push);
    }
    Ok(builder.into_script())
}
