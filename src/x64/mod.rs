//! x86-64 textual assembly surface.
//!
//! The backend's sole output is ordered plain-text instruction mnemonics
//! plus a data-section description and a stack-frame layout; this module
//! owns that surface. An external translator turns the text into machine
//! code and performs no semantic checking of its own, so every line emitted
//! here must already be valid.

pub mod asm;

pub use asm::{
    data_ref, data_ref_off, indexed_ref, reg_name, reg_name_8, stack_ref, AsmWriter, DataEntry,
    DataInit, DataSection, StackFrame, StackSlot,
};
