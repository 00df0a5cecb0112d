//! Core IR and SSA construction for the slate kernel compiler.
//!
//! The crate is organised in two layers:
//!
//! - [`ir`] — the structured, tree-shaped kernel IR: an expression arena
//!   (`Body`), statement trees (`Stmt`/`Block`), functions, attributes, and
//!   the per-node SSA metadata slot.
//! - [`ssa`] — the SSA construction pass, which rewrites a function (or a
//!   standalone statement tree) so that every local scalar has exactly one
//!   definition, composite expressions are flattened into named temporaries,
//!   and values crossing control-flow joins are merged by explicit phi
//!   definitions. A verifier for the resulting form lives alongside it.
//!
//! Entry points are [`ssa::transform_func`] and [`ssa::transform_stmt`].

pub mod error;
pub mod ir;
pub mod ssa;

pub use error::{CompilerError, Result};
