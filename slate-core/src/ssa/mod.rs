//! SSA construction and verification.
//!
//! [`transform::transform_func`] rewrites a function so that every local
//! scalar has exactly one definition, composite expressions are flattened
//! into named temporaries, and control-flow joins carry explicit phi
//! definitions. [`verify::verify_func`] checks the resulting invariants.
//!
//! The pass is single-threaded and stateless across calls: a fresh
//! transformer (with its own scope stack and name counters) is created per
//! top-level entry, so concurrent transforms over disjoint trees are fine.

pub mod rewriter;
pub mod scope;
pub mod transform;
pub mod verify;

pub use transform::{transform_func, transform_stmt};
pub use verify::{verify_func, verify_stmt, VerifyError};

#[cfg(test)]
mod transform_tests;
