//! Vector generation.
//!
//! Each iteration installs fresh spend data into input 0 of a host
//! transaction, wraps the result as a [`TestVector`] and stores it under its
//! content address. The host transaction itself is only rebuilt every
//! [`REBUILD_INTERVAL`] iterations.

use std::{
    fs, io,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use bitcoin::{
    secp256k1::{All, Secp256k1},
    Amount,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    fuzz,
    template::{Signing, Template, TemplateError},
    tx::{TxShell, MAX_OUTPUT_VALUE},
    vector::{Stored, TestVector, VectorError, VectorFormat},
    FlagSet,
};

pub const REBUILD_INTERVAL: u64 = 500;
pub const PROGRESS_INTERVAL: u64 = 1_000;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error("failed to create output directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Random push-only input scripts against random output blobs.
    Verify,
    /// Satisfying spends of random spending templates.
    Less,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub mode: Mode,
    pub flags: FlagSet,
    pub format: VectorFormat,
    pub out_dir: PathBuf,
    /// Stop after this many iterations; unbounded when `None`.
    pub iterations: Option<u64>,
    /// Fixed RNG seed for reproducible corpora.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Less,
            flags: FlagSet::Mandatory,
            format: VectorFormat::Witness,
            out_dir: PathBuf::from("data"),
            iterations: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateStats {
    pub iterations: u64,
    /// Vectors that created a new file.
    pub written: u64,
    /// Vectors whose file already existed.
    pub duplicates: u64,
}

pub struct Generator {
    config: GeneratorConfig,
    rng: StdRng,
    secp: Secp256k1<All>,
    shell: TxShell,
    flags: u32,
    generated: u64,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let secp = Secp256k1::new();
        let shell = TxShell::random(&mut rng, &secp, config.format);
        let flags = config.flags.bits(config.format);
        Self {
            config,
            rng,
            secp,
            shell,
            flags,
            generated: 0,
        }
    }

    /// Produces the next vector without touching the filesystem.
    pub fn next_vector(&mut self) -> Result<TestVector, GenerateError> {
        if self.generated > 0 && self.generated % REBUILD_INTERVAL == 0 {
            self.shell = TxShell::random(&mut self.rng, &self.secp, self.config.format);
        }
        self.generated += 1;

        let format = self.config.format;
        let value = if format.has_witness() {
            self.rng.gen_range(0..=MAX_OUTPUT_VALUE)
        } else {
            0
        };

        let vector = match self.config.mode {
            Mode::Verify => {
                let script_sig = fuzz::random_input_script(&mut self.rng)?;
                let witness = if format.has_witness() {
                    fuzz::random_witness(&mut self.rng)
                } else {
                    Default::default()
                };
                let output_script = if self.rng.gen_ratio(1, fuzz::TEMPLATE_OUTPUT_ODDS) {
                    Template::random_for(format, &mut self.rng, &self.secp).output_script()
                } else {
                    fuzz::random_output_script(&mut self.rng)
                };
                self.shell.install(script_sig, witness.clone());
                TestVector::new(
                    format,
                    output_script,
                    witness,
                    self.shell.transaction(),
                    0,
                    value,
                    self.flags,
                )
            }
            Mode::Less => {
                let template = Template::random_for(format, &mut self.rng, &self.secp);
                // Neither sighash covers input scripts or witnesses, so the
                // shell can be signed before the spend is installed.
                let ctx = {
                    let signing = Signing::new(
                        &self.secp,
                        self.shell.transaction(),
                        0,
                        Amount::from_sat(value),
                    );
                    template.context(&signing)?
                };
                debug!(template = ?template.kind(), "templated spend");
                self.shell.install(ctx.input_script, ctx.witness.clone());
                TestVector::new(
                    format,
                    ctx.output_script,
                    ctx.witness,
                    self.shell.transaction(),
                    0,
                    value,
                    self.flags,
                )
            }
        };
        Ok(vector)
    }

    /// Generates and stores vectors until the iteration bound is reached or
    /// `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<GenerateStats, GenerateError> {
        let out_dir = self.config.out_dir.clone();
        fs::create_dir_all(&out_dir).map_err(|source| GenerateError::CreateDir {
            path: out_dir.clone(),
            source,
        })?;
        info!(
            dir = %out_dir.display(),
            mode = ?self.config.mode,
            format = ?self.config.format,
            flags = self.flags,
            "generating vectors"
        );

        let mut stats = GenerateStats::default();
        while !shutdown.load(Ordering::Relaxed) {
            if self.config.iterations.is_some_and(|limit| stats.iterations >= limit) {
                break;
            }
            let vector = self.next_vector()?;
            match vector.store(&out_dir)? {
                Stored::Created(_) => stats.written += 1,
                Stored::Existing(path) => {
                    debug!(path = %path.display(), "duplicate vector");
                    stats.duplicates += 1;
                }
            }
            stats.iterations += 1;
            if stats.iterations % PROGRESS_INTERVAL == 0 {
                info!(
                    iterations = stats.iterations,
                    written = stats.written,
                    duplicates = stats.duplicates,
                    "progress"
                );
            }
        }

        info!(
            iterations = stats.iterations,
            written = stats.written,
            duplicates = stats.duplicates,
            "generation finished"
        );
        Ok(stats)
    }
}
