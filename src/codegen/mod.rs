// This module is the hub for operator lowering: the multi-dispatch registry
// that maps (operator name, operand type signature) to exactly one strategy,
// and the strategy modules themselves. Every strategy follows the same state
// machine: resolve the signature, branch on the active tier, acquire
// registers, emit the instruction sequence, release scratch registers, and
// return the result operand. No strategy leaves a scratch register
// unreleased on any exit path, and resolution failures occur strictly before
// the first instruction of an operation is emitted.

//! Operator dispatch and the per-operator lowering strategies.
//!
//! # Layout
//!
//! - [`dispatch`] - signatures, the startup-built table, resolution
//! - [`loadstore`] - materialization: named values, constants, the 3-lane
//!   split paths
//! - [`arith`] - add/sub/mul/div, min/max, neg/abs/sqrt, integer bitwise
//! - [`shift`] - immediate and cl-routed shifts, the 64-bit arithmetic
//!   right-shift synthesis
//! - [`convert`] - widening, narrowing, int<->float
//! - [`round`] - the shared rounding-control trio, ldexp, frexp
//! - [`reduce`] - dot product with the tier-pinned reduction order
//! - [`mask`] - comparisons, mask combination, select
//! - [`rng`] - the deterministic generator and its host-side model
//! - [`array`] - the (count, address) array surface

pub mod array;
pub mod arith;
pub mod convert;
pub mod dispatch;
pub mod loadstore;
pub mod mask;
pub mod reduce;
pub mod rng;
pub mod round;
pub mod shift;

pub use dispatch::{registry, ArgPat, Gate, Registry, Strategy};
pub use rng::RngModel;
