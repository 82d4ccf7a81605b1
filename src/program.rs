//! Program model for the execution backend.
//!
//! A `Program` is a declarative element-wise op pipeline over equal-length
//! `f32` buffers. It is validated and fingerprinted into an `Executable`,
//! which the backend uses as the compile-cache artifact. The model is
//! deliberately thin: the interesting machinery lives in the backend that
//! runs it and the counters that observe it.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::BackendError;

/// A single pipeline operation.
///
/// `Add` and `Mul` consume the next input buffer; the remaining ops
/// transform the accumulator in place. `Sum` reduces the accumulator to a
/// single element using the global matmul precision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Element-wise addition with the next input buffer
    Add,
    /// Element-wise multiplication with the next input buffer
    Mul,
    /// Multiply every element by a constant
    Scale(f32),
    /// Perturb every element with the device RNG
    Randomize,
    /// Reduce the accumulator to its sum (precision-policy aware)
    Sum,
}

/// Declarative description of a runnable tensor program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub ops: Vec<OpKind>,
}

impl Program {
    pub fn new(name: impl Into<String>, ops: Vec<OpKind>) -> Self {
        Self {
            name: name.into(),
            ops,
        }
    }

    /// Number of input buffers the pipeline consumes.
    ///
    /// The first input seeds the accumulator; every `Add`/`Mul` consumes one
    /// more.
    pub fn input_arity(&self) -> usize {
        1 + self
            .ops
            .iter()
            .filter(|op| matches!(op, OpKind::Add | OpKind::Mul))
            .count()
    }

    /// Validate invariant expectations before compilation.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.ops.is_empty() {
            return Err(BackendError::EmptyProgram {
                program: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Stable fingerprint over the op structure and arity.
    ///
    /// Used as the compile-cache key. Deliberately excludes the program
    /// name: two programs with identical pipelines share a compilation.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for op in &self.ops {
            match op {
                OpKind::Add => 0u8.hash(&mut hasher),
                OpKind::Mul => 1u8.hash(&mut hasher),
                OpKind::Scale(c) => {
                    2u8.hash(&mut hasher);
                    c.to_bits().hash(&mut hasher);
                }
                OpKind::Randomize => 3u8.hash(&mut hasher),
                OpKind::Sum => 4u8.hash(&mut hasher),
            }
        }
        self.input_arity().hash(&mut hasher);
        hasher.finish()
    }
}

/// A validated program plus its compile-cache fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    program: Program,
    fingerprint: u64,
}

impl Executable {
    pub fn new(program: Program) -> Result<Self, BackendError> {
        program.validate()?;
        let fingerprint = program.fingerprint();
        Ok(Self {
            program,
            fingerprint,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}
