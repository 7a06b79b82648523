// This module serves as the central hub for the backend's core
// infrastructure, the components every lowering strategy builds on: the ISA
// tier model (ordered capability levels detected once per process), the
// register allocator (bounded per-class pools with destructibility
// tracking), the typed operand abstraction (closed sum type over scalars,
// vectors, and masks, with multi-part decomposition for values wider than
// the active tier's registers), per-kernel session management, and the
// unified error taxonomy separating recoverable usage errors from fatal
// invariant violations. Everything here is target-independent in shape; the
// x64 module owns the textual emission surface and the codegen module owns
// the per-operator strategies.

//! Core backend infrastructure.
//!
//! # Key components
//!
//! ## ISA tiers (`isa`)
//! - Ordered capability levels: SSE4.2 baseline, AVX2, AVX-512
//! - One-shot process-wide detection, synthetic sets for tests
//!
//! ## Register allocation (`regalloc`)
//! - Bounded pools mirroring hardware register counts
//! - Non-destructibility marking for in-place versus copy lowering
//! - No automatic spilling: exhaustion is a strategy bug
//!
//! ## Value types and operands (`types`, `operand`)
//! - Closed sum type over scalar/vector/mask shapes
//! - Multi-part decomposition with the `ceil(lanes/native)` invariant
//! - The packed-3-lane memory versus 4-wide register asymmetry
//!
//! ## Session management (`session`)
//! - One instance per kernel compilation; nothing global but the CPU probe
//! - `apply` as the front-end entry point

pub mod error;
pub mod isa;
pub mod operand;
pub mod regalloc;
pub mod session;
pub mod types;

pub use error::{CodegenError, CodegenResult};
pub use isa::{CpuCaps, Tier};
pub use operand::{ConstValue, Location, MaskRepr, Operand};
pub use regalloc::{widen_class, PhysReg, RegAlloc, RegClass, RegFile};
pub use session::{ArrayDecl, ArrayStorage, Emitted, KernelOutput, Session, SessionStats};
pub use types::{ScalarType, ValueType, VECTOR_LANES};
