// This module implements the array surface: the two-field (element count,
// base address) descriptor exposed to generated code for subscript access
// into externally owned growable storage, plus the fixed-size stack-resident
// variant. The descriptor is a view: the runtime owns the backing buffer and
// rewrites the count and base fields whenever a resize relocates it, so
// generated code always loads the base address fresh from the descriptor
// before indexing. Constant indices are checked at code-generation time
// against the declared element count (NegativeIndex / IndexOutOfBounds,
// before any instruction is emitted); register indices emit unchecked
// accesses, since the runtime owns the resize protocol. Stack arrays fix
// their element count at declaration and forbid resizing, so their length
// operation is a constant load.

//! Array surface: length, item load, item store.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::operand::{ConstValue, Location, Operand};
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::{ArrayDecl, ArrayStorage, Emitted, Session};
use crate::core::types::{ScalarType, ValueType};
use crate::x64::{data_ref, data_ref_off, indexed_ref, reg_name, stack_ref, DataEntry, DataInit};

use super::loadstore::{materialize, vp};

/// rbp, the frame base for stack-resident arrays.
const FRAME_BASE: PhysReg = PhysReg::new(RegClass::Gp64, 5);

impl Session {
    /// Declare a growable array surface: a (count, address) descriptor in
    /// the data section, refreshed by the runtime on resize. The declared
    /// count bounds constant-index accesses at code-generation time.
    pub fn define_array(&mut self, name: &str, elem: ScalarType, len: u64) -> CodegenResult<()> {
        self.data.define(DataEntry {
            name: name.to_string(),
            ty: None,
            byte_size: 16,
            align: 8,
            init: DataInit::U64s(vec![len, 0]),
        })?;
        self.arrays.insert(
            name.to_string(),
            ArrayDecl {
                elem,
                len,
                storage: ArrayStorage::Data,
            },
        );
        Ok(())
    }

    /// Declare a fixed-size stack-resident array. The element count is
    /// fixed at construction; there is no resize.
    pub fn define_stack_array(
        &mut self,
        name: &str,
        elem: ScalarType,
        len: u64,
    ) -> CodegenResult<()> {
        let byte_size = (len as u32) * elem.byte_size();
        self.frame.reserve(name, byte_size, elem.byte_size())?;
        self.arrays.insert(
            name.to_string(),
            ArrayDecl {
                elem,
                len,
                storage: ArrayStorage::Stack,
            },
        );
        Ok(())
    }

    fn array_decl(&self, name: &str) -> CodegenResult<ArrayDecl> {
        self.arrays
            .get(name)
            .cloned()
            .ok_or_else(|| CodegenError::InvariantViolation {
                reason: format!("reference to undeclared array '{name}'"),
            })
    }

    /// Element count of an array, as an i64 operand.
    pub fn array_len(&mut self, name: &str) -> CodegenResult<Emitted> {
        let decl = self.array_decl(name)?;
        let mark = self.asm.len();
        let dst = self.regs.acquire(RegClass::Gp64)?;
        match decl.storage {
            ArrayStorage::Data => {
                self.asm.inst2("mov", reg_name(dst), data_ref(name));
            }
            ArrayStorage::Stack => {
                // Fixed at declaration: the length is a constant.
                self.asm.inst2("mov", reg_name(dst), format!("{}", decl.len));
            }
        }
        Ok(Emitted {
            instructions: self.asm.since(mark).to_vec(),
            result: Some(Operand::reg(ValueType::Scalar(ScalarType::I64), dst)),
        })
    }

    /// Load one element. Constant indices are bounds-checked here, before
    /// anything is emitted.
    pub fn array_load(&mut self, name: &str, index: &Operand) -> CodegenResult<Emitted> {
        let decl = self.array_decl(name)?;
        let elem = decl.elem;
        let mark = self.asm.len();
        let addr = self.element_address(name, &decl, index)?;

        let ty = ValueType::Scalar(elem);
        let dst = self.regs.acquire(ty.part_class(self.tier()))?;
        let v = vp(self.tier());
        match elem {
            ScalarType::I32 | ScalarType::I64 => self.asm.inst2("mov", reg_name(dst), &addr.mem),
            ScalarType::F32 => self
                .asm
                .inst2(&format!("{v}movss"), reg_name(dst), &addr.mem),
            ScalarType::F64 => self
                .asm
                .inst2(&format!("{v}movsd"), reg_name(dst), &addr.mem),
        }
        addr.release(self)?;
        Ok(Emitted {
            instructions: self.asm.since(mark).to_vec(),
            result: Some(Operand::reg(ty, dst)),
        })
    }

    /// Store one element.
    pub fn array_store(
        &mut self,
        name: &str,
        index: &Operand,
        value: &Operand,
    ) -> CodegenResult<Emitted> {
        let decl = self.array_decl(name)?;
        let elem = decl.elem;
        if value.ty != ValueType::Scalar(elem) {
            return Err(CodegenError::TypeMismatch {
                op: "array_store".to_string(),
                found: format!("{} stored into {} array", value.ty, elem.name()),
            });
        }
        let mark = self.asm.len();
        let value = materialize(self, value)?;
        let addr = self.element_address(name, &decl, index)?;
        let src = value.regs()[0];
        let v = vp(self.tier());
        match elem {
            ScalarType::I32 | ScalarType::I64 => self.asm.inst2("mov", &addr.mem, reg_name(src)),
            ScalarType::F32 => self
                .asm
                .inst2(&format!("{v}movss"), &addr.mem, reg_name(src)),
            ScalarType::F64 => self
                .asm
                .inst2(&format!("{v}movsd"), &addr.mem, reg_name(src)),
        }
        addr.release(self)?;
        self.retire(&value)?;
        Ok(Emitted {
            instructions: self.asm.since(mark).to_vec(),
            result: None,
        })
    }

    /// Build the memory operand for one element, emitting the base-address
    /// load (for data-section arrays) and index extension as needed.
    fn element_address(
        &mut self,
        name: &str,
        decl: &ArrayDecl,
        index: &Operand,
    ) -> CodegenResult<ElementAddr> {
        let scale = decl.elem.byte_size();

        if let Location::Const(c) = &index.loc {
            let idx = match c {
                ConstValue::I32(v) => *v as i64,
                ConstValue::I64(v) => *v,
                _ => {
                    return Err(CodegenError::TypeMismatch {
                        op: "array index".to_string(),
                        found: index.ty.to_string(),
                    })
                }
            };
            if idx < 0 {
                return Err(CodegenError::NegativeIndex { index: idx });
            }
            if idx as u64 >= decl.len {
                return Err(CodegenError::IndexOutOfBounds {
                    index: idx,
                    len: decl.len,
                });
            }
            let disp = idx * scale as i64;
            return match decl.storage {
                ArrayStorage::Data => {
                    let base = self.regs.acquire(RegClass::Gp64)?;
                    self.asm
                        .inst2("mov", reg_name(base), data_ref_off(name, 8));
                    Ok(ElementAddr {
                        mem: indexed_ref(base, None, 1, disp),
                        base: Some(base),
                        index: None,
                    })
                }
                ArrayStorage::Stack => {
                    let slot = self.frame.lookup(name).ok_or_else(|| {
                        CodegenError::InvariantViolation {
                            reason: format!("missing stack slot for array '{name}'"),
                        }
                    })?;
                    Ok(ElementAddr {
                        mem: stack_ref(slot.offset + disp as i32),
                        base: None,
                        index: None,
                    })
                }
            };
        }

        // Register index: sign-extend a 32-bit index for addressing. No
        // runtime bounds check is emitted; the runtime owns the resize
        // protocol and the kernel contract.
        if !matches!(
            index.ty,
            ValueType::Scalar(ScalarType::I32) | ValueType::Scalar(ScalarType::I64)
        ) {
            return Err(CodegenError::TypeMismatch {
                op: "array index".to_string(),
                found: index.ty.to_string(),
            });
        }
        let index = materialize(self, index)?;
        let ip = index.regs()[0];
        let idx64 = if ip.class == RegClass::Gp32 {
            let wide = self.regs.acquire(RegClass::Gp64)?;
            self.asm.inst2(
                "movsxd",
                reg_name(wide),
                reg_name(ip.reclassed(RegClass::Gp32)),
            );
            self.retire(&index)?;
            wide
        } else {
            ip
        };

        match decl.storage {
            ArrayStorage::Data => {
                let base = self.regs.acquire(RegClass::Gp64)?;
                self.asm
                    .inst2("mov", reg_name(base), data_ref_off(name, 8));
                Ok(ElementAddr {
                    mem: indexed_ref(base, Some(idx64), scale, 0),
                    base: Some(base),
                    index: Some(idx64),
                })
            }
            ArrayStorage::Stack => {
                let slot = self.frame.lookup(name).ok_or_else(|| {
                    CodegenError::InvariantViolation {
                        reason: format!("missing stack slot for array '{name}'"),
                    }
                })?;
                Ok(ElementAddr {
                    mem: indexed_ref(FRAME_BASE, Some(idx64), scale, slot.offset as i64),
                    base: None,
                    index: Some(idx64),
                })
            }
        }
    }
}

/// A formed element address plus the scratch registers backing it.
struct ElementAddr {
    mem: String,
    base: Option<PhysReg>,
    index: Option<PhysReg>,
}

impl ElementAddr {
    fn release(self, sess: &mut Session) -> CodegenResult<()> {
        if let Some(base) = self.base {
            sess.regs.release(base)?;
        }
        if let Some(index) = self.index {
            if sess.regs.can_destruct(index) {
                sess.regs.release(index)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isa::{CpuCaps, Tier};

    fn session() -> Session {
        Session::new(CpuCaps::for_tier(Tier::Sse42))
    }

    fn const_index(v: i64) -> Operand {
        Operand::constant(ValueType::Scalar(ScalarType::I64), ConstValue::I64(v))
    }

    #[test]
    fn length_reads_count_field() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::F32, 10).unwrap();
        let emitted = sess.array_len("xs").unwrap();
        assert_eq!(emitted.instructions, vec!["mov rax, [xs]".to_string()]);
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn stack_array_length_is_constant() {
        let mut sess = session();
        sess.define_stack_array("tmp", ScalarType::F64, 4).unwrap();
        let emitted = sess.array_len("tmp").unwrap();
        assert_eq!(emitted.instructions, vec!["mov rax, 4".to_string()]);
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn constant_index_addresses_through_base_field() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::F64, 10).unwrap();
        let emitted = sess.array_load("xs", &const_index(3)).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("[xs+8]"), "base address field: {text}");
        assert!(text.contains("+ 24"), "index 3 times 8 bytes: {text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn negative_index_rejected() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::F32, 10).unwrap();
        let err = sess.array_load("xs", &const_index(-1)).unwrap_err();
        assert_eq!(err, CodegenError::NegativeIndex { index: -1 });
        assert!(err.is_usage());
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn index_at_length_rejected() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::F32, 10).unwrap();
        let err = sess.array_load("xs", &const_index(10)).unwrap_err();
        assert_eq!(
            err,
            CodegenError::IndexOutOfBounds {
                index: 10,
                len: 10
            }
        );
        // Strictly before emission: nothing was appended.
        assert!(sess.finish().instructions.is_empty());
    }

    #[test]
    fn register_index_scales_by_element_size() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::I32, 100).unwrap();
        let idx = sess
            .apply(
                "load",
                &[Operand::constant(
                    ValueType::Scalar(ScalarType::I32),
                    ConstValue::I32(7),
                )],
            )
            .unwrap()
            .result
            .unwrap();
        let emitted = sess.array_load("xs", &idx).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("movsxd"), "32-bit index extends: {text}");
        assert!(text.contains("*4"), "{text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn store_type_checked_against_element() {
        let mut sess = session();
        sess.define_array("xs", ScalarType::F64, 8).unwrap();
        let wrong = sess
            .apply(
                "load",
                &[Operand::constant(
                    ValueType::Scalar(ScalarType::F32),
                    ConstValue::F32(1.0),
                )],
            )
            .unwrap()
            .result
            .unwrap();
        let err = sess.array_store("xs", &const_index(0), &wrong).unwrap_err();
        assert!(matches!(err, CodegenError::TypeMismatch { .. }));
        sess.retire(&wrong).unwrap();

        let right = sess
            .apply(
                "load",
                &[Operand::constant(
                    ValueType::Scalar(ScalarType::F64),
                    ConstValue::F64(2.0),
                )],
            )
            .unwrap()
            .result
            .unwrap();
        let emitted = sess.array_store("xs", &const_index(0), &right).unwrap();
        assert!(emitted.result.is_none());
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("movsd [")));
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn stack_array_uses_frame_addressing() {
        let mut sess = session();
        sess.define_stack_array("tmp", ScalarType::I64, 4).unwrap();
        let emitted = sess.array_load("tmp", &const_index(2)).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("rbp"), "{text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }
}
