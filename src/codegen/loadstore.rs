// This module implements value materialization: loading named data-section
// and stack-resident values and immediate constants into registers, and
// storing register operands back to named destinations. It owns the
// load-bearing 3-lane asymmetry: in registers a 3-lane value uses the 4-lane
// layout with an undefined top lane, but in memory it is packed to exactly
// three elements, so loads assemble the value from an 8-byte and a 4-byte
// piece (or a 16-byte and an 8-byte piece for 64-bit elements) and stores
// mirror that split instead of touching memory past the value's end.
// Multi-part operands load and store one native register per part at
// consecutive offsets. Float constants are materialized through a
// general-purpose register bit move rather than a constant pool, and vector
// constants splat lane zero with the tier's broadcast form.

//! Loads, stores, and constant materialization.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::{ConstValue, Location, Operand};
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::{data_ref_off, reg_name, stack_ref};

use super::dispatch::{all_value_types, ArgPat, Gate, Registry, SCALARS};

pub(crate) fn install(reg: &mut Registry) {
    reg.register("load", vec![ArgPat::AnyNamed], Gate::None, lower_load);
    for s in SCALARS {
        reg.register("load", vec![ArgPat::Const(s)], Gate::None, lower_load);
    }
    for ty in all_value_types() {
        reg.register(
            "store",
            vec![ArgPat::Exact(ty), ArgPat::AnyNamed],
            Gate::None,
            lower_store,
        );
    }
}

/// `v` mnemonic prefix above the baseline tier. Mixing legacy-SSE and VEX
/// encodings stalls real hardware, so everything switches together.
pub(crate) fn vp(tier: Tier) -> &'static str {
    if tier >= Tier::Avx2 {
        "v"
    } else {
        ""
    }
}

/// Memory operand string for a byte offset into a named operand.
pub(crate) fn operand_mem(sess: &Session, operand: &Operand, offset: u32) -> CodegenResult<String> {
    match &operand.loc {
        Location::Data(name) => {
            if !sess.data.contains(name) && !sess.arrays.contains_key(name) {
                return Err(CodegenError::InvariantViolation {
                    reason: format!("reference to undefined data symbol '{name}'"),
                });
            }
            Ok(data_ref_off(name, offset))
        }
        Location::Stack(name) => {
            let slot = sess.frame.lookup(name).ok_or_else(|| {
                CodegenError::InvariantViolation {
                    reason: format!("reference to unreserved stack slot '{name}'"),
                }
            })?;
            Ok(stack_ref(slot.offset + offset as i32))
        }
        _ => Err(CodegenError::InvariantViolation {
            reason: "memory operand requested for non-memory location".to_string(),
        }),
    }
}

/// Full-width vector move mnemonic for a register class and element type.
fn vec_move(tier: Tier, elem: ScalarType, class: RegClass) -> String {
    let base = match elem {
        ScalarType::F32 => "movups",
        ScalarType::F64 => "movupd",
        ScalarType::I32 | ScalarType::I64 => {
            if class == RegClass::Zmm {
                // EVEX spells the int move with an element width.
                return "vmovdqu64".to_string();
            }
            "movdqu"
        }
    };
    format!("{}{}", vp(tier), base)
}

/// Register-register vector copy mnemonic.
pub(crate) fn vec_copy(tier: Tier, elem: ScalarType, class: RegClass) -> String {
    let base = match elem {
        ScalarType::F32 => "movaps",
        ScalarType::F64 => "movapd",
        ScalarType::I32 | ScalarType::I64 => {
            if class == RegClass::Zmm {
                return "vmovdqa64".to_string();
            }
            "movdqa"
        }
    };
    format!("{}{}", vp(tier), base)
}

/// Copy one register to another of the same class.
pub(crate) fn emit_copy(sess: &mut Session, elem: ScalarType, dst: PhysReg, src: PhysReg) {
    let tier = sess.tier();
    match dst.class {
        RegClass::Gp32 | RegClass::Gp64 => {
            sess.asm.inst2("mov", reg_name(dst), reg_name(src));
        }
        RegClass::Kmask => {
            sess.asm.inst2("kmovq", reg_name(dst), reg_name(src));
        }
        _ => {
            let mn = vec_copy(tier, elem, dst.class);
            sess.asm.inst2(&mn, reg_name(dst), reg_name(src));
        }
    }
}

/// Load `lanes` elements into a vector register from `src + offset`,
/// without reading past the packed end of the value.
fn emit_load_lanes(
    sess: &mut Session,
    elem: ScalarType,
    lanes: u8,
    dst: PhysReg,
    src: &Operand,
    offset: u32,
) -> CodegenResult<()> {
    let tier = sess.tier();
    let v = vp(tier);
    let span = lanes as u32 * elem.byte_size();
    let mem = operand_mem(sess, src, offset)?;
    let dst_x = reg_name(dst.reclassed(RegClass::Xmm));
    match span {
        4 => {
            let mn = if elem.is_float() { "movss" } else { "movd" };
            sess.asm.inst2(&format!("{v}{mn}"), &dst_x, &mem);
        }
        8 => {
            let mn = if elem.is_float() { "movsd" } else { "movq" };
            sess.asm.inst2(&format!("{v}{mn}"), &dst_x, &mem);
        }
        12 => {
            // 3 lanes of 4-byte elements: 8-byte piece, 4-byte piece, merge.
            let hi_mem = operand_mem(sess, src, offset + 8)?;
            let scratch = sess.regs.acquire(RegClass::Xmm)?;
            let s = reg_name(scratch);
            if elem.is_float() {
                sess.asm.inst2(&format!("{v}movsd"), &dst_x, &mem);
                sess.asm.inst2(&format!("{v}movss"), &s, &hi_mem);
                if tier >= Tier::Avx2 {
                    sess.asm.inst3("vmovlhps", &dst_x, &dst_x, &s);
                } else {
                    sess.asm.inst2("movlhps", &dst_x, &s);
                }
            } else {
                sess.asm.inst2(&format!("{v}movq"), &dst_x, &mem);
                sess.asm.inst2(&format!("{v}movd"), &s, &hi_mem);
                if tier >= Tier::Avx2 {
                    sess.asm.inst3("vpunpcklqdq", &dst_x, &dst_x, &s);
                } else {
                    sess.asm.inst2("punpcklqdq", &dst_x, &s);
                }
            }
            sess.regs.release(scratch)?;
        }
        24 => {
            // 3 lanes of 8-byte elements in a ymm-class register.
            let hi_mem = operand_mem(sess, src, offset + 16)?;
            let dst_y = reg_name(dst.reclassed(RegClass::Ymm));
            let scratch = sess.regs.acquire(RegClass::Xmm)?;
            let s = reg_name(scratch);
            if elem.is_float() {
                sess.asm.inst2("vmovupd", &dst_x, &mem);
                sess.asm.inst2("vmovsd", &s, &hi_mem);
                sess.asm.inst4("vinsertf128", &dst_y, &dst_y, &s, "1");
            } else {
                sess.asm.inst2("vmovdqu", &dst_x, &mem);
                sess.asm.inst2("vmovq", &s, &hi_mem);
                sess.asm.inst4("vinserti128", &dst_y, &dst_y, &s, "1");
            }
            sess.regs.release(scratch)?;
        }
        _ => {
            let mn = vec_move(tier, elem, dst.class);
            sess.asm.inst2(&mn, reg_name(dst), &mem);
        }
    }
    Ok(())
}

/// Store `lanes` elements from a vector register to `dst + offset`,
/// without writing past the packed end of the value.
fn emit_store_lanes(
    sess: &mut Session,
    elem: ScalarType,
    lanes: u8,
    src: PhysReg,
    dst: &Operand,
    offset: u32,
) -> CodegenResult<()> {
    let tier = sess.tier();
    let v = vp(tier);
    let span = lanes as u32 * elem.byte_size();
    let mem = operand_mem(sess, dst, offset)?;
    let src_x = reg_name(src.reclassed(RegClass::Xmm));
    match span {
        4 => {
            let mn = if elem.is_float() { "movss" } else { "movd" };
            sess.asm.inst2(&format!("{v}{mn}"), &mem, &src_x);
        }
        8 => {
            let mn = match elem {
                ScalarType::F32 => "movlps",
                ScalarType::F64 => "movsd",
                _ => "movq",
            };
            sess.asm.inst2(&format!("{v}{mn}"), &mem, &src_x);
        }
        12 => {
            // 2-lane store plus a 1-lane store; lane 3 never reaches memory.
            let hi_mem = operand_mem(sess, dst, offset + 8)?;
            if elem.is_float() {
                sess.asm.inst2(&format!("{v}movlps"), &mem, &src_x);
                sess.asm.inst3(&format!("{v}extractps"), &hi_mem, &src_x, "2");
            } else {
                sess.asm.inst2(&format!("{v}movq"), &mem, &src_x);
                sess.asm.inst3(&format!("{v}pextrd"), &hi_mem, &src_x, "2");
            }
        }
        24 => {
            let hi_mem = operand_mem(sess, dst, offset + 16)?;
            let src_y = reg_name(src.reclassed(RegClass::Ymm));
            let scratch = sess.regs.acquire(RegClass::Xmm)?;
            let s = reg_name(scratch);
            if elem.is_float() {
                sess.asm.inst2("vmovupd", &mem, &src_x);
                sess.asm.inst3("vextractf128", &s, &src_y, "1");
                sess.asm.inst2("vmovsd", &hi_mem, &s);
            } else {
                sess.asm.inst2("vmovdqu", &mem, &src_x);
                sess.asm.inst3("vextracti128", &s, &src_y, "1");
                sess.asm.inst2("vmovq", &hi_mem, &s);
            }
            sess.regs.release(scratch)?;
        }
        _ => {
            let mn = vec_move(tier, elem, src.class);
            sess.asm.inst2(&mn, &mem, reg_name(src));
        }
    }
    Ok(())
}

/// Load a named value into registers, one part per native register.
pub(crate) fn load_named(sess: &mut Session, operand: &Operand) -> CodegenResult<Operand> {
    let ty = operand.ty;
    let tier = sess.tier();

    if let ValueType::Scalar(elem) = ty {
        let class = ty.part_class(tier);
        let dst = sess.regs.acquire(class)?;
        let mem = operand_mem(sess, operand, 0)?;
        match elem {
            ScalarType::I32 | ScalarType::I64 => {
                sess.asm.inst2("mov", reg_name(dst), &mem);
            }
            ScalarType::F32 => {
                sess.asm
                    .inst2(&format!("{}movss", vp(tier)), reg_name(dst), &mem);
            }
            ScalarType::F64 => {
                sess.asm
                    .inst2(&format!("{}movsd", vp(tier)), reg_name(dst), &mem);
            }
        }
        return Ok(Operand::reg(ty, dst));
    }

    let elem = ty.elem();
    let count = ty.part_count(tier);
    let native = ty.native_lane_count(tier);
    let class = ty.part_class(tier);
    let mut parts = Vec::with_capacity(count as usize);
    for i in 0..count {
        let lanes_here = if i + 1 == count {
            ty.tail_lanes(tier)
        } else {
            native
        };
        let offset = i as u32 * native as u32 * elem.byte_size();
        let dst = sess.regs.acquire(class)?;
        emit_load_lanes(sess, elem, lanes_here, dst, operand, offset)?;
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}

/// Materialize an immediate into registers: bit move through a
/// general-purpose register for float scalars, splat for vectors.
pub(crate) fn load_const(sess: &mut Session, ty: ValueType, value: ConstValue) -> CodegenResult<Operand> {
    let tier = sess.tier();

    if let ValueType::Scalar(elem) = ty {
        return match elem {
            ScalarType::I32 => {
                let dst = sess.regs.acquire(RegClass::Gp32)?;
                sess.asm.inst2("mov", reg_name(dst), format!("{value}"));
                Ok(Operand::reg(ty, dst))
            }
            ScalarType::I64 => {
                let dst = sess.regs.acquire(RegClass::Gp64)?;
                sess.asm.inst2("mov", reg_name(dst), format!("{value}"));
                Ok(Operand::reg(ty, dst))
            }
            ScalarType::F32 => {
                let dst = sess.regs.acquire(RegClass::Xmm)?;
                let gp = sess.regs.acquire(RegClass::Gp32)?;
                sess.asm
                    .inst2("mov", reg_name(gp), format!("0x{:08x}", value.bits() as u32));
                sess.asm
                    .inst2(&format!("{}movd", vp(tier)), reg_name(dst), reg_name(gp));
                sess.regs.release(gp)?;
                Ok(Operand::reg(ty, dst))
            }
            ScalarType::F64 => {
                let dst = sess.regs.acquire(RegClass::Xmm)?;
                let gp = sess.regs.acquire(RegClass::Gp64)?;
                sess.asm
                    .inst2("mov", reg_name(gp), format!("0x{:016x}", value.bits()));
                sess.asm
                    .inst2(&format!("{}movq", vp(tier)), reg_name(dst), reg_name(gp));
                sess.regs.release(gp)?;
                Ok(Operand::reg(ty, dst))
            }
        };
    }

    // Vector splat: materialize lane zero, broadcast, copy to other parts.
    let elem = ty.elem();
    let class = ty.part_class(tier);
    let first = sess.regs.acquire(class)?;
    let first_x = first.reclassed(RegClass::Xmm);

    match elem {
        ScalarType::I32 | ScalarType::F32 => {
            let gp = sess.regs.acquire(RegClass::Gp32)?;
            sess.asm
                .inst2("mov", reg_name(gp), format!("0x{:08x}", value.bits() as u32));
            sess.asm
                .inst2(&format!("{}movd", vp(tier)), reg_name(first_x), reg_name(gp));
            sess.regs.release(gp)?;
        }
        ScalarType::I64 | ScalarType::F64 => {
            let gp = sess.regs.acquire(RegClass::Gp64)?;
            sess.asm
                .inst2("mov", reg_name(gp), format!("0x{:016x}", value.bits()));
            sess.asm
                .inst2(&format!("{}movq", vp(tier)), reg_name(first_x), reg_name(gp));
            sess.regs.release(gp)?;
        }
    }
    emit_broadcast(sess, elem, first);

    let count = ty.part_count(tier);
    let mut parts = vec![first];
    for _ in 1..count {
        let extra = sess.regs.acquire(class)?;
        emit_copy(sess, elem, extra, first);
        parts.push(extra);
    }
    Ok(Operand::parts(ty, parts))
}

/// Broadcast lane 0 of a vector register across all its lanes.
pub(crate) fn emit_broadcast(sess: &mut Session, elem: ScalarType, reg: PhysReg) {
    let tier = sess.tier();
    let name = reg_name(reg);
    let low = reg_name(reg.reclassed(RegClass::Xmm));
    if tier == Tier::Sse42 {
        match elem {
            ScalarType::F32 => sess.asm.inst3("shufps", &name, &name, "0x00"),
            ScalarType::F64 => sess.asm.inst2("unpcklpd", &name, &name),
            ScalarType::I32 => sess.asm.inst3("pshufd", &name, &name, "0x00"),
            ScalarType::I64 => sess.asm.inst2("punpcklqdq", &name, &name),
        }
        return;
    }
    match elem {
        ScalarType::F32 => sess.asm.inst2("vbroadcastss", &name, &low),
        ScalarType::F64 => {
            if reg.class == RegClass::Xmm {
                sess.asm.inst2("vmovddup", &name, &low);
            } else {
                sess.asm.inst2("vbroadcastsd", &name, &low);
            }
        }
        ScalarType::I32 => sess.asm.inst2("vpbroadcastd", &name, &low),
        ScalarType::I64 => sess.asm.inst2("vpbroadcastq", &name, &low),
    }
}

/// Bring an operand into registers, emitting loads if needed. Register
/// operands pass through with ownership unchanged.
pub(crate) fn materialize(sess: &mut Session, operand: &Operand) -> CodegenResult<Operand> {
    match &operand.loc {
        Location::Parts(_) => Ok(operand.clone()),
        Location::Data(_) | Location::Stack(_) => load_named(sess, operand),
        Location::Const(v) => load_const(sess, operand.ty, *v),
    }
}

fn lower_load(sess: &mut Session, _op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    materialize(sess, &operands[0]).map(Some)
}

fn lower_store(sess: &mut Session, op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let value = &operands[0];
    let dest = &operands[1];
    if value.ty != dest.ty {
        return Err(CodegenError::TypeMismatch {
            op: op.to_string(),
            found: format!("{} stored to {}", value.ty, dest.ty),
        });
    }
    let tier = sess.tier();
    let ty = value.ty;
    let value = materialize(sess, value)?;

    if let ValueType::Scalar(elem) = ty {
        let src = value.regs()[0];
        let mem = operand_mem(sess, dest, 0)?;
        match elem {
            ScalarType::I32 | ScalarType::I64 => sess.asm.inst2("mov", &mem, reg_name(src)),
            ScalarType::F32 => sess
                .asm
                .inst2(&format!("{}movss", vp(tier)), &mem, reg_name(src)),
            ScalarType::F64 => sess
                .asm
                .inst2(&format!("{}movsd", vp(tier)), &mem, reg_name(src)),
        }
        sess.retire(&value)?;
        return Ok(None);
    }

    let elem = ty.elem();
    let native = ty.native_lane_count(tier);
    let count = ty.part_count(tier);
    for (i, &src) in value.regs().iter().enumerate() {
        let lanes_here = if i as u8 + 1 == count {
            ty.tail_lanes(tier)
        } else {
            native
        };
        let offset = i as u32 * native as u32 * elem.byte_size();
        emit_store_lanes(sess, elem, lanes_here, src, dest, offset)?;
    }
    sess.retire(&value)?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isa::CpuCaps;
    use crate::x64::DataInit;

    fn session(tier: Tier) -> Session {
        Session::new(CpuCaps::for_tier(tier))
    }

    #[test]
    fn three_lane_store_never_writes_lane_four() {
        let mut sess = session(Tier::Sse42);
        let ty = ValueType::vector(ScalarType::F32, 3);
        let v = sess.define_value("v", ty, DataInit::F32s(vec![1.0, 2.0, 3.0])).unwrap();
        let loaded = sess.apply("load", &[v.clone()]).unwrap().result.unwrap();
        let emitted = sess.apply("store", &[loaded, v]).unwrap();
        // 2-lane store plus 1-lane store, no 16-byte move.
        assert!(emitted.instructions.iter().any(|l| l.starts_with("movlps")));
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("extractps")));
        assert!(!emitted.instructions.iter().any(|l| l.contains("movups")));
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn three_lane_load_assembles_from_two_pieces() {
        let mut sess = session(Tier::Avx2);
        let ty = ValueType::vector(ScalarType::I32, 3);
        let v = sess
            .define_value("v", ty, DataInit::U32s(vec![1, 2, 3]))
            .unwrap();
        let emitted = sess.apply("load", &[v]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("vmovq"));
        assert!(text.contains("[v+8]"));
        assert!(text.contains("vpunpcklqdq"));
        let result = emitted.result.unwrap();
        assert_eq!(result.regs().len(), 1);
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn wide_vector_decomposes_per_tier() {
        for (tier, parts) in [(Tier::Sse42, 4), (Tier::Avx2, 2), (Tier::Avx512, 1)] {
            let mut sess = session(tier);
            let ty = ValueType::vector(ScalarType::F32, 16);
            let v = sess
                .define_value("v", ty, DataInit::F32s(vec![0.5; 16]))
                .unwrap();
            let result = sess.apply("load", &[v]).unwrap().result.unwrap();
            assert_eq!(result.regs().len(), parts, "at {}", tier.name());
            sess.retire(&result).unwrap();
            assert_eq!(sess.live_registers(), 0);
        }
    }

    #[test]
    fn float_constant_goes_through_gp_bits() {
        let mut sess = session(Tier::Sse42);
        let ty = ValueType::Scalar(ScalarType::F64);
        let c = Operand::constant(ty, ConstValue::F64(1.0));
        let emitted = sess.apply("load", &[c]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("0x3ff0000000000000"));
        assert!(text.contains("movq"));
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn splat_uses_tier_broadcast() {
        let mut sess = session(Tier::Avx2);
        let ty = ValueType::vector(ScalarType::F32, 8);
        let c = Operand::constant(ty, ConstValue::F32(2.0));
        let emitted = sess.apply("load", &[c]).unwrap();
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("vbroadcastss")));

        let mut base = session(Tier::Sse42);
        let c = Operand::constant(ty, ConstValue::F32(2.0));
        let emitted = base.apply("load", &[c]).unwrap();
        assert!(emitted.instructions.iter().any(|l| l.starts_with("shufps")));
        // Two parts at the baseline: the second is a copy of the first.
        assert_eq!(emitted.result.as_ref().unwrap().regs().len(), 2);
        assert!(emitted.instructions.iter().any(|l| l.starts_with("movaps")));
    }

    #[test]
    fn store_type_mismatch_is_usage_error() {
        let mut sess = session(Tier::Sse42);
        let f4 = ValueType::vector(ScalarType::F32, 4);
        let i4 = ValueType::vector(ScalarType::I32, 4);
        let v = sess.define_value("v", f4, DataInit::Zero).unwrap();
        let d = sess.define_value("d", i4, DataInit::Zero).unwrap();
        let loaded = sess.apply("load", &[v]).unwrap().result.unwrap();
        let err = sess.apply("store", &[loaded.clone(), d]).unwrap_err();
        assert!(matches!(err, CodegenError::TypeMismatch { .. }));
        assert!(err.is_usage());
        sess.retire(&loaded).unwrap();
    }
}
