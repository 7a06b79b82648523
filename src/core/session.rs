// This module provides per-kernel compilation session management. Session is
// the central hub owning everything one kernel compilation mutates: the
// register allocator, the instruction writer, the data-section and
// stack-frame builders, declared array surfaces, and the lazily created RNG
// state words. Nothing is process-global except the immutable CPU capability
// probe, which makes the single-instance-per-kernel lifetime explicit and
// testable: parallel compilation of independent kernels uses one Session
// each. apply() is the front-end entry point: it resolves a lowering
// strategy through the dispatch registry, enforces the multi-part operand
// invariant, invokes the strategy, and returns the instructions emitted for
// that one operation together with the result operand. SessionStats tracks
// operation and instruction counts for diagnostics.

//! Per-kernel compilation session.

use hashbrown::HashMap;

use super::error::CodegenResult;
use super::isa::{CpuCaps, Tier};
use super::operand::Operand;
use super::regalloc::RegAlloc;
use super::types::{ScalarType, ValueType};
use crate::codegen::dispatch::registry;
use crate::codegen::rng::RngSlots;
use crate::x64::{AsmWriter, DataEntry, DataInit, DataSection, StackFrame};

/// Where a declared array surface keeps its backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayStorage {
    /// Growable storage owned by the runtime; the data section holds the
    /// (count, address) view, refreshed by the runtime on resize.
    Data,
    /// Fixed-size storage in the kernel stack frame; resizing is forbidden.
    Stack,
}

/// Codegen-time description of one declared array surface.
#[derive(Debug, Clone)]
pub struct ArrayDecl {
    pub elem: ScalarType,
    /// Declared element count; the bound for constant-index checks.
    pub len: u64,
    pub storage: ArrayStorage,
}

/// Compilation statistics for one kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub ops_applied: u64,
    pub instructions_emitted: u64,
}

/// Result of lowering one operation: the emitted instruction lines and the
/// result operand (absent for stores and other pure-effect operations).
#[derive(Debug, Clone)]
pub struct Emitted {
    pub instructions: Vec<String>,
    pub result: Option<Operand>,
}

/// Final output of one kernel compilation.
#[derive(Debug, Clone)]
pub struct KernelOutput {
    pub instructions: Vec<String>,
    pub data_section: String,
    pub stack_frame: String,
}

/// Per-kernel compilation session.
///
/// Owns all mutable backend state for one kernel. The backend is
/// single-threaded and synchronous: every operation runs to completion
/// before the next begins, and nothing here is shared across sessions.
pub struct Session {
    caps: CpuCaps,
    tier: Tier,
    pub(crate) regs: RegAlloc,
    pub(crate) asm: AsmWriter,
    pub(crate) data: DataSection,
    pub(crate) frame: StackFrame,
    pub(crate) arrays: HashMap<String, ArrayDecl>,
    pub(crate) rng: Option<RngSlots>,
    stats: SessionStats,
}

impl Session {
    /// Session for an explicit capability set. Tests and cross-tier
    /// comparisons use [`CpuCaps::for_tier`] here.
    pub fn new(caps: CpuCaps) -> Self {
        Self {
            caps,
            tier: caps.highest_supported_tier(),
            regs: RegAlloc::new(caps),
            asm: AsmWriter::new(),
            data: DataSection::new(),
            frame: StackFrame::new(),
            arrays: HashMap::new(),
            rng: None,
            stats: SessionStats::default(),
        }
    }

    /// Session using the host CPU's detected capabilities.
    pub fn for_host() -> Self {
        Self::new(CpuCaps::detect())
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn caps(&self) -> CpuCaps {
        self.caps
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Allocator instrumentation for the register-hygiene property.
    pub fn live_registers(&self) -> u32 {
        self.regs.live_total()
    }

    pub fn register_counters(&self) -> (u64, u64) {
        (self.regs.acquired_total(), self.regs.released_total())
    }

    /// Lower one operation. Resolution failures occur strictly before any
    /// instruction is emitted; on success the returned instructions are the
    /// exact lines appended by this operation.
    pub fn apply(&mut self, op: &str, operands: &[Operand]) -> CodegenResult<Emitted> {
        for operand in operands {
            operand.check_parts(op, self.tier)?;
        }
        let strategy = registry().resolve(op, operands)?;
        let mark = self.asm.len();
        log::debug!("lowering '{}' at tier {}", op, self.tier.name());
        let result = strategy(self, op, operands)?;
        if let Some(res) = &result {
            res.check_parts(op, self.tier)?;
        }
        let instructions = self.asm.since(mark).to_vec();
        self.stats.ops_applied += 1;
        self.stats.instructions_emitted += instructions.len() as u64;
        Ok(Emitted {
            instructions,
            result,
        })
    }

    /// Define a named persistent value in the data section and return the
    /// operand referring to it.
    pub fn define_value(
        &mut self,
        name: &str,
        ty: ValueType,
        init: DataInit,
    ) -> CodegenResult<Operand> {
        self.data.define(DataEntry {
            name: name.to_string(),
            ty: Some(ty),
            byte_size: ty.byte_size(),
            align: ty.alignment(),
            init,
        })?;
        Ok(Operand::named(ty, name))
    }

    /// Reserve a named stack-resident value and return the operand
    /// referring to it.
    pub fn define_stack_value(&mut self, name: &str, ty: ValueType) -> CodegenResult<Operand> {
        self.frame.reserve(name, ty.byte_size(), ty.alignment())?;
        Ok(Operand::stack(ty, name))
    }

    /// Rendered data-section description as it stands now; `finish` gives
    /// the final version.
    pub fn data_section_text(&self) -> String {
        self.data.render()
    }

    /// Finish the kernel: the full instruction stream plus the rendered
    /// data-section and stack-frame descriptions. The session retains no
    /// state across compilations.
    pub fn finish(self) -> KernelOutput {
        KernelOutput {
            instructions: self.asm.lines().to_vec(),
            data_section: self.data.render(),
            stack_frame: self.frame.render(),
        }
    }

    /// Mark every register of an operand non-destructible: its value is
    /// still needed by a pending operand, so strategies must copy rather
    /// than operate in place, and must not release it.
    pub fn preserve(&mut self, operand: &Operand) {
        for &reg in operand.regs() {
            self.regs.preserve(reg);
        }
    }

    /// Clear the non-destructible marking set by [`Session::preserve`].
    pub fn unpreserve(&mut self, operand: &Operand) {
        for &reg in operand.regs() {
            self.regs.unpreserve(reg);
        }
    }

    /// Release every destructible register of an operand back to the pool.
    /// Registers marked non-destructible stay live: another pending operand
    /// still needs their value.
    pub fn retire(&mut self, operand: &Operand) -> CodegenResult<()> {
        for &reg in operand.regs() {
            if self.regs.can_destruct(reg) {
                self.regs.release(reg)?;
            }
        }
        Ok(())
    }
}
