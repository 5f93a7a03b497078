//! Test vector files.
//!
//! A vector is a handful of newline-terminated text lines. The canonical
//! witness-aware layout is
//!
//! ```text
//! <output script hex>
//! <witness hex>          consensus-encoded witness stack of the target input
//! <transaction hex>
//! <input index>
//! <spent value>          satoshis
//! <verify flags>
//! ```
//!
//! The pre-witness layout drops the witness and value lines. A vector is
//! stored under the lowercase hex SHA-256 of its own text, so identical
//! vectors collapse into one file.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use bitcoin::{
    consensus,
    hashes::{sha256, Hash},
    hex::{DisplayHex, FromHex},
    ScriptBuf, Transaction, Witness,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector is not valid UTF-8")]
    Utf8,
    #[error("expected 4 or 6 lines, found {0}")]
    LineCount(usize),
    #[error("line {line}: invalid hex: {reason}")]
    Hex { line: usize, reason: String },
    #[error("line {line}: invalid number `{value}`")]
    Number { line: usize, value: String },
    #[error("invalid witness encoding: {0}")]
    Witness(String),
    #[error("invalid transaction encoding: {0}")]
    Transaction(String),
    #[error("input index {index} out of range for {inputs} inputs")]
    InputIndex { index: u32, inputs: usize },
    #[error("failed to write {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    /// Four lines, no witness or spent value.
    Legacy,
    /// Six lines, carrying the witness stack and spent value.
    Witness,
}

impl VectorFormat {
    pub fn line_count(self) -> usize {
        match self {
            VectorFormat::Legacy => 4,
            VectorFormat::Witness => 6,
        }
    }

    pub fn has_witness(self) -> bool {
        matches!(self, VectorFormat::Witness)
    }
}

/// Outcome of [`TestVector::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored {
    Created(PathBuf),
    /// An identical file with this digest already existed and was left
    /// untouched.
    Existing(PathBuf),
}

impl Stored {
    pub fn path(&self) -> &Path {
        match self {
            Stored::Created(path) | Stored::Existing(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    pub format: VectorFormat,
    pub output_script: ScriptBuf,
    /// Always empty for [`VectorFormat::Legacy`].
    pub witness: Witness,
    /// Raw transaction bytes; may be malformed in parsed vectors.
    pub transaction: Vec<u8>,
    pub input_index: u32,
    /// Always zero for [`VectorFormat::Legacy`].
    pub value: u64,
    pub flags: u32,
}

impl TestVector {
    pub fn new(
        format: VectorFormat,
        output_script: ScriptBuf,
        witness: Witness,
        tx: &Transaction,
        input_index: u32,
        value: u64,
        flags: u32,
    ) -> Self {
        let (witness, value) = if format.has_witness() {
            (witness, value)
        } else {
            (Witness::new(), 0)
        };
        Self {
            format,
            output_script,
            witness,
            transaction: consensus::serialize(tx),
            input_index,
            value,
            flags,
        }
    }

    pub fn serialize(&self) -> String {
        let mut lines = Vec::with_capacity(self.format.line_count());
        lines.push(self.output_script.as_bytes().to_lower_hex_string());
        if self.format.has_witness() {
            lines.push(consensus::serialize(&self.witness).to_lower_hex_string());
        }
        lines.push(self.transaction.to_lower_hex_string());
        lines.push(self.input_index.to_string());
        if self.format.has_witness() {
            lines.push(self.value.to_string());
        }
        lines.push(self.flags.to_string());

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Content address of this vector.
    pub fn id(&self) -> String {
        digest(self.serialize().as_bytes())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, VectorError> {
        let text = std::str::from_utf8(bytes).map_err(|_| VectorError::Utf8)?;
        let lines: Vec<&str> = text.lines().collect();
        let format = match lines.len() {
            4 => VectorFormat::Legacy,
            6 => VectorFormat::Witness,
            other => return Err(VectorError::LineCount(other)),
        };

        let mut fields = lines.into_iter().enumerate().map(|(idx, line)| (idx + 1, line));
        let mut next = || fields.next().unwrap_or((0, ""));

        let output_script = ScriptBuf::from_bytes(parse_hex(next())?);
        let witness = if format.has_witness() {
            let bytes = parse_hex(next())?;
            consensus::deserialize::<Witness>(&bytes)
                .map_err(|err| VectorError::Witness(err.to_string()))?
        } else {
            Witness::new()
        };
        let transaction = parse_hex(next())?;
        let input_index = parse_number(next())?;
        let value = if format.has_witness() {
            parse_number(next())?
        } else {
            0
        };
        let flags = parse_number(next())?;

        Ok(Self {
            format,
            output_script,
            witness,
            transaction,
            input_index,
            value,
            flags,
        })
    }

    /// Transaction bytes with the vector's witness installed on the target
    /// input.
    ///
    /// When the transaction already carries that witness the raw bytes are
    /// returned untouched, so verifiers see exactly what was generated.
    pub fn spending_transaction(&self) -> Result<Vec<u8>, VectorError> {
        if !self.format.has_witness() {
            return Ok(self.transaction.clone());
        }
        let mut tx: Transaction = consensus::deserialize(&self.transaction)
            .map_err(|err| VectorError::Transaction(err.to_string()))?;
        let inputs = tx.input.len();
        let input = tx
            .input
            .get_mut(self.input_index as usize)
            .ok_or(VectorError::InputIndex {
                index: self.input_index,
                inputs,
            })?;
        if input.witness == self.witness {
            return Ok(self.transaction.clone());
        }
        input.witness = self.witness.clone();
        Ok(consensus::serialize(&tx))
    }

    /// Writes the vector into `dir` under its content address.
    ///
    /// The text is staged in a temporary file and linked into place, so the
    /// digest name never holds a partial write. A file already under that
    /// name is kept only if its content matches.
    pub fn store(&self, dir: &Path) -> Result<Stored, VectorError> {
        let text = self.serialize();
        let path = dir.join(digest(text.as_bytes()));
        let io_err = |source: io::Error| VectorError::Io {
            path: path.clone(),
            source,
        };

        let mut staged = NamedTempFile::new_in(dir).map_err(io_err)?;
        staged.write_all(text.as_bytes()).map_err(io_err)?;

        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(Stored::Created(path)),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                if fs::read(&path).map_err(io_err)? == text.as_bytes() {
                    return Ok(Stored::Existing(path));
                }
                warn!(path = %path.display(), "replacing corrupt vector");
                err.file.persist(&path).map_err(|err| io_err(err.error))?;
                Ok(Stored::Created(path))
            }
            Err(err) => Err(io_err(err.error)),
        }
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn digest(content: &[u8]) -> String {
    sha256::Hash::hash(content).to_string()
}

fn parse_hex((line, field): (usize, &str)) -> Result<Vec<u8>, VectorError> {
    Vec::<u8>::from_hex(field.trim()).map_err(|err| VectorError::Hex {
        line,
        reason: err.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>((line, field): (usize, &str)) -> Result<T, VectorError> {
    field.trim().parse().map_err(|_| VectorError::Number {
        line,
        value: field.to_string(),
    })
}
