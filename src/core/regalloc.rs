//! Physical register pools and destructibility tracking.
//!
//! Lowering strategies acquire registers from bounded per-class pools that
//! mirror the hardware register counts, and must release everything they do
//! not hand back as part of a result operand. There is no automatic
//! spilling: an empty pool is a strategy bug surfaced as
//! [`CodegenError::Exhausted`], and strategies are expected to stay within
//! budget by decomposing wide operands rather than holding many live
//! registers.
//!
//! The narrow/wide general-purpose classes name the same 16-entry file
//! (`eax` is `rax`), and the three vector classes name the same vector file
//! (`xmm3` is the low half of `ymm3`); widening between them is a pure
//! rename and never allocates.

use super::error::{CodegenError, CodegenResult};
use super::isa::{CpuCaps, Tier};

/// Register classes visible to lowering strategies.
///
/// The class selects the printed name width and the tier gate; ownership is
/// tracked per underlying file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// 32-bit general purpose (`eax` .. `r15d`).
    Gp32,
    /// 64-bit general purpose (`rax` .. `r15`).
    Gp64,
    /// 128-bit vector (`xmm0` ..).
    Xmm,
    /// 256-bit vector (`ymm0` ..), AVX2 and above.
    Ymm,
    /// 512-bit vector (`zmm0` ..), AVX-512 only.
    Zmm,
    /// Predicate register (`k1` .. `k7`), AVX-512 only.
    Kmask,
}

impl RegClass {
    pub fn file(self) -> RegFile {
        match self {
            RegClass::Gp32 | RegClass::Gp64 => RegFile::Gp,
            RegClass::Xmm | RegClass::Ymm | RegClass::Zmm => RegFile::Vec,
            RegClass::Kmask => RegFile::Mask,
        }
    }

    /// Lowest tier at which this class exists.
    pub fn min_tier(self) -> Tier {
        match self {
            RegClass::Gp32 | RegClass::Gp64 | RegClass::Xmm => Tier::Sse42,
            RegClass::Ymm => Tier::Avx2,
            RegClass::Zmm | RegClass::Kmask => Tier::Avx512,
        }
    }

    /// Register width in bytes.
    pub fn byte_width(self) -> u32 {
        match self {
            RegClass::Gp32 => 4,
            RegClass::Gp64 => 8,
            RegClass::Xmm => 16,
            RegClass::Ymm => 32,
            RegClass::Zmm => 64,
            RegClass::Kmask => 8,
        }
    }
}

/// Underlying physical register files. Classes within one file alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegFile {
    Gp,
    Vec,
    Mask,
}

impl RegFile {
    fn pool_index(self) -> usize {
        match self {
            RegFile::Gp => 0,
            RegFile::Vec => 1,
            RegFile::Mask => 2,
        }
    }
}

/// An owned handle to one physical register.
///
/// Exclusively held by whichever strategy acquired it until released back to
/// its pool; never aliased across two live owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysReg {
    pub class: RegClass,
    pub index: u8,
}

impl PhysReg {
    pub const fn new(class: RegClass, index: u8) -> Self {
        Self { class, index }
    }

    pub fn file(self) -> RegFile {
        self.class.file()
    }

    /// Rename to another class of the same file. Pure renaming: the handle
    /// still refers to the same physical register and the same ownership.
    pub fn reclassed(self, class: RegClass) -> Self {
        debug_assert_eq!(self.class.file(), class.file());
        Self {
            class,
            index: self.index,
        }
    }
}

/// General-purpose registers available for allocation. `rsp` (4) and `rbp`
/// (5) are reserved for the stack frame.
const GP_ALLOCATABLE: u32 = 0xFFFF & !(1 << 4) & !(1 << 5);

/// `k0` is the no-mask encoding and never allocatable.
const KMASK_ALLOCATABLE: u32 = 0xFE;

/// Register allocator for a single kernel compilation.
///
/// Not safe for concurrent acquisition; each kernel compilation owns one
/// instance (the backend is single-threaded per kernel).
pub struct RegAlloc {
    caps: CpuCaps,
    /// Free bitmask per file (1 = free).
    free: [u32; 3],
    /// Allocatable bitmask per file, fixed at construction.
    allocatable: [u32; 3],
    /// Registers currently marked non-destructible.
    preserved: [u32; 3],
    /// Lifetime counters for the register-hygiene tests.
    acquired: u64,
    released: u64,
}

impl RegAlloc {
    pub fn new(caps: CpuCaps) -> Self {
        let vec_regs: u32 = if caps.supports(Tier::Avx512) {
            u32::MAX // xmm0-xmm31
        } else {
            0xFFFF // xmm0-xmm15
        };
        let allocatable = [GP_ALLOCATABLE, vec_regs, KMASK_ALLOCATABLE];
        Self {
            caps,
            free: allocatable,
            allocatable,
            preserved: [0; 3],
            acquired: 0,
            released: 0,
        }
    }

    /// Acquire any free register of the given class.
    pub fn acquire(&mut self, class: RegClass) -> CodegenResult<PhysReg> {
        self.check_class(class)?;
        let pool = class.file().pool_index();
        if self.free[pool] == 0 {
            return Err(CodegenError::Exhausted { class });
        }
        let index = self.free[pool].trailing_zeros() as u8;
        self.free[pool] &= !(1 << index);
        self.acquired += 1;
        log::trace!("acquire {:?}{}", class, index);
        Ok(PhysReg::new(class, index))
    }

    /// Acquire one specific register (e.g. `rcx` for a variable shift
    /// count). Fails with `Exhausted` if it is already owned.
    pub fn acquire_named(&mut self, class: RegClass, index: u8) -> CodegenResult<PhysReg> {
        self.check_class(class)?;
        let pool = class.file().pool_index();
        let bit = 1u32 << index;
        if self.allocatable[pool] & bit == 0 {
            return Err(CodegenError::InvariantViolation {
                reason: format!("register {:?}{} is not allocatable", class, index),
            });
        }
        if self.free[pool] & bit == 0 {
            return Err(CodegenError::Exhausted { class });
        }
        self.free[pool] &= !bit;
        self.acquired += 1;
        log::trace!("acquire named {:?}{}", class, index);
        Ok(PhysReg::new(class, index))
    }

    /// Whether a specific register is currently free.
    pub fn is_free(&self, class: RegClass, index: u8) -> bool {
        let pool = class.file().pool_index();
        self.free[pool] & (1 << index) != 0
    }

    /// Return a register to its pool. Double release is a fatal invariant
    /// violation, not a recoverable error.
    pub fn release(&mut self, reg: PhysReg) -> CodegenResult<()> {
        let pool = reg.file().pool_index();
        let bit = 1u32 << reg.index;
        if self.free[pool] & bit != 0 {
            return Err(CodegenError::InvariantViolation {
                reason: format!("double release of {:?}{}", reg.class, reg.index),
            });
        }
        self.free[pool] |= bit;
        self.preserved[pool] &= !bit;
        self.released += 1;
        log::trace!("release {:?}{}", reg.class, reg.index);
        Ok(())
    }

    /// Mark a register non-destructible: its current value is still needed
    /// by another pending operand. A borrow-like permission, not ownership.
    pub fn preserve(&mut self, reg: PhysReg) {
        self.preserved[reg.file().pool_index()] |= 1 << reg.index;
    }

    /// Clear the non-destructible mark.
    pub fn unpreserve(&mut self, reg: PhysReg) {
        self.preserved[reg.file().pool_index()] &= !(1 << reg.index);
    }

    /// True if no other pending operand needs this register's current value.
    /// Strategies use this to choose in-place versus copy-then-operate.
    pub fn can_destruct(&self, reg: PhysReg) -> bool {
        self.preserved[reg.file().pool_index()] & (1 << reg.index) == 0
    }

    fn check_class(&self, class: RegClass) -> CodegenResult<()> {
        if !self.caps.supports(class.min_tier()) {
            return Err(CodegenError::InvariantViolation {
                reason: format!(
                    "register class {:?} requires tier {} (have {})",
                    class,
                    class.min_tier().name(),
                    self.caps.highest_supported_tier().name()
                ),
            });
        }
        Ok(())
    }

    /// Number of currently owned registers in a file.
    pub fn live_count(&self, file: RegFile) -> u32 {
        let pool = file.pool_index();
        (self.allocatable[pool] & !self.free[pool]).count_ones()
    }

    /// Total live registers across all files.
    pub fn live_total(&self) -> u32 {
        self.live_count(RegFile::Gp) + self.live_count(RegFile::Vec) + self.live_count(RegFile::Mask)
    }

    pub fn acquired_total(&self) -> u64 {
        self.acquired
    }

    pub fn released_total(&self) -> u64 {
        self.released
    }
}

/// Widen a narrow handle to its wide counterpart's name. Pure renaming -
/// never allocates.
pub fn widen_class(reg: PhysReg) -> PhysReg {
    match reg.class {
        RegClass::Gp32 => reg.reclassed(RegClass::Gp64),
        RegClass::Xmm => reg.reclassed(RegClass::Ymm),
        RegClass::Ymm => reg.reclassed(RegClass::Zmm),
        _ => reg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_for(tier: Tier) -> RegAlloc {
        RegAlloc::new(CpuCaps::for_tier(tier))
    }

    #[test]
    fn acquire_release_roundtrip() {
        let mut regs = alloc_for(Tier::Sse42);
        let r = regs.acquire(RegClass::Xmm).unwrap();
        assert_eq!(regs.live_count(RegFile::Vec), 1);
        regs.release(r).unwrap();
        assert_eq!(regs.live_count(RegFile::Vec), 0);
        assert_eq!(regs.acquired_total(), regs.released_total());
    }

    #[test]
    fn double_release_is_fatal() {
        let mut regs = alloc_for(Tier::Sse42);
        let r = regs.acquire(RegClass::Gp64).unwrap();
        regs.release(r).unwrap();
        let err = regs.release(r).unwrap_err();
        assert!(matches!(err, CodegenError::InvariantViolation { .. }));
        assert!(!err.is_usage());
    }

    #[test]
    fn pool_exhaustion() {
        let mut regs = alloc_for(Tier::Sse42);
        // 14 allocatable GP registers (rsp/rbp reserved).
        let mut held = Vec::new();
        for _ in 0..14 {
            held.push(regs.acquire(RegClass::Gp64).unwrap());
        }
        let err = regs.acquire(RegClass::Gp64).unwrap_err();
        assert_eq!(
            err,
            CodegenError::Exhausted {
                class: RegClass::Gp64
            }
        );
        for r in held {
            regs.release(r).unwrap();
        }
    }

    #[test]
    fn rsp_rbp_never_allocated() {
        let mut regs = alloc_for(Tier::Sse42);
        let mut seen = Vec::new();
        while let Ok(r) = regs.acquire(RegClass::Gp64) {
            assert_ne!(r.index, 4, "rsp must not be allocated");
            assert_ne!(r.index, 5, "rbp must not be allocated");
            seen.push(r);
        }
        assert_eq!(seen.len(), 14);
    }

    #[test]
    fn named_acquisition() {
        let mut regs = alloc_for(Tier::Sse42);
        // rcx is index 1.
        let rcx = regs.acquire_named(RegClass::Gp64, 1).unwrap();
        assert_eq!(rcx.index, 1);
        assert!(!regs.is_free(RegClass::Gp64, 1));
        assert!(matches!(
            regs.acquire_named(RegClass::Gp64, 1),
            Err(CodegenError::Exhausted { .. })
        ));
        regs.release(rcx).unwrap();
        assert!(regs.is_free(RegClass::Gp64, 1));
    }

    #[test]
    fn destructibility_marking() {
        let mut regs = alloc_for(Tier::Sse42);
        let r = regs.acquire(RegClass::Xmm).unwrap();
        assert!(regs.can_destruct(r));
        regs.preserve(r);
        assert!(!regs.can_destruct(r));
        regs.unpreserve(r);
        assert!(regs.can_destruct(r));
        // Release clears any stale mark.
        regs.preserve(r);
        regs.release(r).unwrap();
        let again = regs.acquire_named(RegClass::Xmm, r.index).unwrap();
        assert!(regs.can_destruct(again));
        regs.release(again).unwrap();
    }

    #[test]
    fn class_tier_gating() {
        let mut regs = alloc_for(Tier::Sse42);
        assert!(matches!(
            regs.acquire(RegClass::Zmm),
            Err(CodegenError::InvariantViolation { .. })
        ));
        let mut wide = alloc_for(Tier::Avx512);
        let z = wide.acquire(RegClass::Zmm).unwrap();
        wide.release(z).unwrap();
        let k = wide.acquire(RegClass::Kmask).unwrap();
        assert!(k.index >= 1, "k0 is reserved");
        wide.release(k).unwrap();
    }

    #[test]
    fn avx512_doubles_vector_file() {
        let mut narrow = alloc_for(Tier::Avx2);
        let mut count = 0;
        while narrow.acquire(RegClass::Xmm).is_ok() {
            count += 1;
        }
        assert_eq!(count, 16);

        let mut wide = alloc_for(Tier::Avx512);
        let mut count = 0;
        while wide.acquire(RegClass::Xmm).is_ok() {
            count += 1;
        }
        assert_eq!(count, 32);
    }

    #[test]
    fn widening_is_pure_renaming() {
        let mut regs = alloc_for(Tier::Avx512);
        let before = regs.acquired_total();
        let x = regs.acquire(RegClass::Xmm).unwrap();
        let y = widen_class(x);
        assert_eq!(y.class, RegClass::Ymm);
        assert_eq!(y.index, x.index);
        let z = widen_class(y);
        assert_eq!(z.class, RegClass::Zmm);
        assert_eq!(regs.acquired_total(), before + 1);
        // Same underlying register: releasing through the widened handle
        // frees the original.
        regs.release(z).unwrap();
        assert!(regs.is_free(RegClass::Xmm, x.index));
    }
}
