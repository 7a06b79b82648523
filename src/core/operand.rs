// This module implements the operand descriptor handed between the front-end,
// the dispatch registry, and the lowering strategies. An Operand pairs a
// ValueType with a location: an ordered list of physical register parts (one
// entry for native-width values, several for multi-part decomposed ones), a
// named data-section symbol, a named stack slot, or an immediate constant not
// yet materialized into a register. The OperandParts representation replaces
// tuple-or-single-register conventions with one fixed shape whose length
// always equals the type's part count at the active tier; check_parts
// enforces that invariant and reports violations as fatal internal errors.
// ConstValue carries immediate literals and is range-checked against the
// accepting operator's constant domain before use.

//! Operand descriptors: typed values plus how to reach them.

use std::fmt;

use super::error::{CodegenError, CodegenResult};
use super::isa::Tier;
use super::regalloc::{PhysReg, RegClass};
use super::types::{ScalarType, ValueType};

/// An immediate literal, not yet materialized into a register or memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn scalar_type(self) -> ScalarType {
        match self {
            ConstValue::I32(_) => ScalarType::I32,
            ConstValue::I64(_) => ScalarType::I64,
            ConstValue::F32(_) => ScalarType::F32,
            ConstValue::F64(_) => ScalarType::F64,
        }
    }

    /// Integer value, if this is an integer constant.
    pub fn as_int(self) -> Option<i64> {
        match self {
            ConstValue::I32(v) => Some(v as i64),
            ConstValue::I64(v) => Some(v),
            ConstValue::F32(_) | ConstValue::F64(_) => None,
        }
    }

    /// Raw bit pattern, zero-extended to 64 bits. Used to materialize float
    /// constants through a general-purpose register instead of a load.
    pub fn bits(self) -> u64 {
        match self {
            ConstValue::I32(v) => v as u32 as u64,
            ConstValue::I64(v) => v as u64,
            ConstValue::F32(v) => v.to_bits() as u64,
            ConstValue::F64(v) => v.to_bits(),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::I32(v) => write!(f, "{v}"),
            ConstValue::I64(v) => write!(f, "{v}"),
            ConstValue::F32(v) => write!(f, "{v}"),
            ConstValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Physical representation of a mask operand, tier-dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskRepr {
    /// Dedicated predicate register (`k1`..`k7`), AVX-512.
    Kreg,
    /// Full vector register of all-ones/all-zeros lanes.
    VectorLanes,
}

/// Where a value lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// One physical register per part, in lane order.
    Parts(Vec<PhysReg>),
    /// Named persistent value in the kernel data section.
    Data(String),
    /// Named stack-resident value in the kernel frame.
    Stack(String),
    /// Immediate constant, not yet materialized.
    Const(ConstValue),
}

/// One typed value and how to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub ty: ValueType,
    pub loc: Location,
}

impl Operand {
    /// Single-register operand.
    pub fn reg(ty: ValueType, reg: PhysReg) -> Self {
        Self {
            ty,
            loc: Location::Parts(vec![reg]),
        }
    }

    /// Multi-part register operand, parts in lane order.
    pub fn parts(ty: ValueType, parts: Vec<PhysReg>) -> Self {
        Self {
            ty,
            loc: Location::Parts(parts),
        }
    }

    /// Named data-section value.
    pub fn named(ty: ValueType, name: impl Into<String>) -> Self {
        Self {
            ty,
            loc: Location::Data(name.into()),
        }
    }

    /// Named stack-resident value.
    pub fn stack(ty: ValueType, name: impl Into<String>) -> Self {
        Self {
            ty,
            loc: Location::Stack(name.into()),
        }
    }

    /// Immediate constant. A vector type with a scalar constant denotes a
    /// splat; the element type must match the literal's type.
    pub fn constant(ty: ValueType, value: ConstValue) -> Self {
        debug_assert_eq!(ty.elem(), value.scalar_type());
        Self {
            ty,
            loc: Location::Const(value),
        }
    }

    /// Register parts, empty for non-register operands.
    pub fn regs(&self) -> &[PhysReg] {
        match &self.loc {
            Location::Parts(parts) => parts,
            _ => &[],
        }
    }

    /// The sole register of a single-part operand.
    pub fn single_reg(&self) -> Option<PhysReg> {
        match &self.loc {
            Location::Parts(parts) if parts.len() == 1 => Some(parts[0]),
            _ => None,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self.loc, Location::Data(_) | Location::Stack(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self.loc, Location::Const(_))
    }

    pub fn in_registers(&self) -> bool {
        matches!(self.loc, Location::Parts(_))
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        match self.loc {
            Location::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Symbol name for named operands.
    pub fn symbol(&self) -> Option<&str> {
        match &self.loc {
            Location::Data(name) | Location::Stack(name) => Some(name),
            _ => None,
        }
    }

    /// Physical mask representation, judged from the part register class.
    pub fn mask_repr(&self) -> Option<MaskRepr> {
        if !self.ty.is_mask() {
            return None;
        }
        match self.regs().first() {
            Some(r) if r.class == RegClass::Kmask => Some(MaskRepr::Kreg),
            Some(_) => Some(MaskRepr::VectorLanes),
            None => None,
        }
    }

    /// Enforce the multi-part invariant: a register operand must carry
    /// exactly `part_count(tier)` parts. Violations are lowering-strategy
    /// bugs and abort the kernel.
    pub fn check_parts(&self, op: &str, tier: Tier) -> CodegenResult<()> {
        if let Location::Parts(parts) = &self.loc {
            let expect = self.ty.part_count(tier) as usize;
            if parts.len() != expect {
                return Err(CodegenError::invariant(
                    op,
                    tier,
                    format!(
                        "operand {} carries {} parts, expected {}",
                        self.ty,
                        parts.len(),
                        expect
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Location::Parts(parts) => write!(f, "{}:r{}", self.ty, parts.len()),
            Location::Data(name) => write!(f, "{}:@{}", self.ty, name),
            Location::Stack(name) => write!(f, "{}:%{}", self.ty, name),
            Location::Const(v) => write!(f, "{}:#{}", self.ty, v),
        }
    }
}
