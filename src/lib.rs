//! lanegen - tier-adaptive x86-64 code generation for data-parallel
//! numeric kernels.
//!
//! Given a stream of typed operations, lanegen lowers each one to a
//! sequence of textual x86-64 instruction mnemonics, choosing the cheapest
//! instruction-set tier detected at load time (SSE4.2 baseline, AVX2,
//! AVX-512) and decomposing operations wider than the hardware's native
//! vector width into several narrower hardware operations. The output of a
//! compilation is plain text: the instruction stream, a data-section
//! description, and a stack-frame layout, handed to an external assembler
//! and runtime.
//!
//! # Primary usage
//!
//! ```
//! use lanegen::core::{ConstValue, Operand, ScalarType, Session, ValueType};
//! use lanegen::x64::DataInit;
//!
//! // One session per kernel compilation.
//! let mut sess = Session::for_host();
//! let ty = ValueType::vector(ScalarType::F32, 4);
//! let weights = sess
//!     .define_value("weights", ty, DataInit::F32s(vec![1.0, 2.0, 3.0, 4.0]))
//!     .unwrap();
//! let x = sess
//!     .apply("load", &[Operand::constant(ty, ConstValue::F32(0.5))])
//!     .unwrap()
//!     .result
//!     .unwrap();
//! let sum = sess.apply("add", &[x, weights]).unwrap();
//! let out = sess.finish();
//! assert!(!out.instructions.is_empty());
//! # let _ = sum;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - ISA tiers, register allocation, operand types, sessions
//! - [`x64`] - the textual assembly surface
//! - [`codegen`] - operator dispatch and the lowering strategies

pub mod codegen;
pub mod core;
pub mod x64;

// Re-export the surface a front-end works against.
pub use crate::core::{
    CodegenError, CodegenResult, ConstValue, CpuCaps, Emitted, KernelOutput, Operand, PhysReg,
    RegAlloc, RegClass, ScalarType, Session, SessionStats, Tier, ValueType,
};
pub use codegen::{registry, RngModel};
