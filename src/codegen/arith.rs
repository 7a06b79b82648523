// This module implements the arithmetic lowering strategies: add/sub/mul/div,
// min/max, neg/abs/sqrt, and the integer bitwise operators, for scalars and
// vectors at every tier, plus the load-fused variants that combine a named
// operand's memory load into the instruction itself. The per-call shape is
// uniform: materialize inputs, choose a destination (reusing an input
// register in place when the allocator says no other pending operand needs
// its value, copying first otherwise), emit the two-operand SSE or
// three-operand VEX/EVEX form, release everything not returned as the
// result. Integer scalar division routes through the rax/rdx pair the ISA
// mandates, saving and restoring those registers when another live operand
// occupies them. Float abs/neg clear or flip the sign bit with a bit mask,
// never a compare-and-branch. 64-bit lane min/max below AVX-512 are
// synthesized from a compare and bitwise recombination.

//! Arithmetic, min/max, and bitwise lowering strategies.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::reg_name;

use super::dispatch::{all_value_types, ArgPat, Gate, Registry};
use super::loadstore::{emit_copy, materialize, operand_mem, vp};

pub(crate) fn install(reg: &mut Registry) {
    for ty in all_value_types() {
        for op in ["add", "sub", "mul", "div", "min", "max", "and", "or", "xor"] {
            reg.register(
                op,
                vec![ArgPat::Exact(ty), ArgPat::Exact(ty)],
                Gate::Combine,
                lower_binary,
            );
        }
        for op in ["neg", "abs"] {
            reg.register(op, vec![ArgPat::Exact(ty)], Gate::None, lower_unary);
        }
        if ty.elem().is_float() {
            reg.register("sqrt", vec![ArgPat::Exact(ty)], Gate::None, lower_unary);
            // Load-fused variants: the named operand's memory form feeds the
            // instruction directly. Only full-register spans qualify; packed
            // 3-lane values would read past their end.
            if ty.lanes() != 3 && (ty.is_scalar() || ty.byte_size() % 16 == 0) {
                for op in ["add", "sub", "mul"] {
                    reg.register(
                        op,
                        vec![ArgPat::Exact(ty), ArgPat::AnyNamed],
                        Gate::Combine,
                        lower_binary_fused,
                    );
                }
            }
        }
        if ty.is_scalar() && !ty.elem().is_float() {
            for op in ["add", "sub", "mul"] {
                reg.register(
                    op,
                    vec![ArgPat::Exact(ty), ArgPat::Const(ScalarType::I32)],
                    Gate::ConstCombine,
                    lower_binary_const,
                );
                if ty.elem() == ScalarType::I64 {
                    reg.register(
                        op,
                        vec![ArgPat::Exact(ty), ArgPat::Const(ScalarType::I64)],
                        Gate::ConstCombine,
                        lower_binary_const,
                    );
                }
            }
        }
    }
}

/// Pick a destination for an operation whose first input is `src`.
///
/// Reuses `src` in place when destructible. Otherwise acquires a fresh
/// register of the same class; under two-operand encodings the caller's
/// value is copied into it first.
pub(crate) fn dst_for(
    sess: &mut Session,
    elem: ScalarType,
    src: PhysReg,
    copy_needed: bool,
) -> CodegenResult<(PhysReg, bool)> {
    if sess.regs.can_destruct(src) {
        return Ok((src, true));
    }
    let fresh = sess.regs.acquire(src.class)?;
    if copy_needed {
        emit_copy(sess, elem, fresh, src);
    }
    Ok((fresh, false))
}

/// Release an input part unless it was reused as the destination or is
/// marked non-destructible.
pub(crate) fn release_input(sess: &mut Session, part: PhysReg, dst: PhysReg) -> CodegenResult<()> {
    if part != dst && sess.regs.can_destruct(part) {
        sess.regs.release(part)?;
    }
    Ok(())
}

/// Packed mnemonic base for a binary operator, before the `v` prefix.
fn packed_mn(op: &str, elem: ScalarType) -> &'static str {
    match (op, elem) {
        ("add", ScalarType::F32) => "addps",
        ("add", ScalarType::F64) => "addpd",
        ("add", ScalarType::I32) => "paddd",
        ("add", ScalarType::I64) => "paddq",
        ("sub", ScalarType::F32) => "subps",
        ("sub", ScalarType::F64) => "subpd",
        ("sub", ScalarType::I32) => "psubd",
        ("sub", ScalarType::I64) => "psubq",
        ("mul", ScalarType::F32) => "mulps",
        ("mul", ScalarType::F64) => "mulpd",
        ("mul", ScalarType::I32) => "pmulld",
        ("div", ScalarType::F32) => "divps",
        ("div", ScalarType::F64) => "divpd",
        ("min", ScalarType::F32) => "minps",
        ("min", ScalarType::F64) => "minpd",
        ("min", ScalarType::I32) => "pminsd",
        ("max", ScalarType::F32) => "maxps",
        ("max", ScalarType::F64) => "maxpd",
        ("max", ScalarType::I32) => "pmaxsd",
        ("and", _) => "pand",
        ("or", _) => "por",
        ("xor", _) => "pxor",
        _ => unreachable!("packed mnemonic for '{op}' on {:?}", elem),
    }
}

/// Scalar-float mnemonic for a binary operator.
fn scalar_float_mn(op: &str, elem: ScalarType) -> &'static str {
    match (op, elem) {
        ("add", ScalarType::F32) => "addss",
        ("add", ScalarType::F64) => "addsd",
        ("sub", ScalarType::F32) => "subss",
        ("sub", ScalarType::F64) => "subsd",
        ("mul", ScalarType::F32) => "mulss",
        ("mul", ScalarType::F64) => "mulsd",
        ("div", ScalarType::F32) => "divss",
        ("div", ScalarType::F64) => "divsd",
        ("min", ScalarType::F32) => "minss",
        ("min", ScalarType::F64) => "minsd",
        ("max", ScalarType::F32) => "maxss",
        ("max", ScalarType::F64) => "maxsd",
        _ => unreachable!("scalar float mnemonic for '{op}'"),
    }
}

/// Full packed mnemonic with the tier prefix and EVEX integer-width
/// spelling where the plain VEX form does not exist at 512 bits.
fn packed_mn_full(tier: Tier, op: &str, elem: ScalarType, class: RegClass) -> String {
    if class == RegClass::Zmm && matches!(op, "and" | "or" | "xor") {
        let suffix = if elem.byte_size() == 8 { "q" } else { "d" };
        return format!("vp{op}{suffix}");
    }
    format!("{}{}", vp(tier), packed_mn(op, elem))
}

fn lower_binary(sess: &mut Session, op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    match ty {
        ValueType::Scalar(elem) if !elem.is_float() => {
            if op == "div" {
                return lower_int_div(sess, operands).map(Some);
            }
            if matches!(op, "min" | "max") {
                return lower_int_scalar_minmax(sess, op, operands).map(Some);
            }
            lower_gp_binary(sess, op, operands).map(Some)
        }
        _ => {
            if matches!(op, "min" | "max") && ty.is_vector() && ty.elem() == ScalarType::I64 {
                if sess.tier() < Tier::Avx512 {
                    return lower_i64_vector_minmax(sess, op, operands).map(Some);
                }
                let mn = if op == "min" { "vpminsq" } else { "vpmaxsq" };
                return lower_packed(sess, mn, operands).map(Some);
            }
            let mn = if ty.is_scalar() {
                format!("{}{}", vp(sess.tier()), scalar_float_mn(op, ty.elem()))
            } else {
                packed_mn_full(sess.tier(), op, ty.elem(), ty.part_class(sess.tier()))
            };
            lower_packed(sess, &mn, operands).map(Some)
        }
    }
}

/// Generic packed/scalar-float binary walker: one instruction per part.
fn lower_packed(sess: &mut Session, mn: &str, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let three_op = sess.tier() >= Tier::Avx2;
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm.inst3(mn, reg_name(dst), reg_name(ap), reg_name(bp));
        } else {
            sess.asm.inst2(mn, reg_name(dst), reg_name(bp));
        }
        release_input(sess, ap, dst)?;
        release_input(sess, bp, dst)?;
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}

/// Binary op with the second operand fused from memory.
fn lower_binary_fused(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let three_op = tier >= Tier::Avx2;
    let mn = if ty.is_scalar() {
        format!("{}{}", vp(tier), scalar_float_mn(op, elem))
    } else {
        packed_mn_full(tier, op, elem, ty.part_class(tier))
    };
    let a = materialize(sess, &operands[0])?;
    let native_bytes = ty.native_lane_count(tier) as u32 * elem.byte_size();
    let mut parts = Vec::with_capacity(a.regs().len());
    for (i, &ap) in a.regs().iter().enumerate() {
        let mem = operand_mem(sess, &operands[1], i as u32 * native_bytes)?;
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm.inst3(&mn, reg_name(dst), reg_name(ap), &mem);
        } else {
            sess.asm.inst2(&mn, reg_name(dst), &mem);
        }
        release_input(sess, ap, dst)?;
        parts.push(dst);
    }
    Ok(Some(Operand::parts(ty, parts)))
}

/// Scalar integer add/sub/mul and bitwise ops in general-purpose registers.
fn lower_gp_binary(sess: &mut Session, op: &str, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let mn = match op {
        "add" => "add",
        "sub" => "sub",
        "mul" => "imul",
        "and" => "and",
        "or" => "or",
        "xor" => "xor",
        _ => unreachable!("gp binary '{op}'"),
    };
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let ap = a.regs()[0];
    let bp = b.regs()[0];
    let (dst, _reused) = dst_for(sess, ty.elem(), ap, true)?;
    sess.asm.inst2(mn, reg_name(dst), reg_name(bp));
    release_input(sess, ap, dst)?;
    release_input(sess, bp, dst)?;
    Ok(Operand::reg(ty, dst))
}

/// Scalar integer binary op against an immediate.
fn lower_binary_const(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let value = operands[1]
        .const_value()
        .and_then(|v| v.as_int())
        .ok_or_else(|| CodegenError::TypeMismatch {
            op: op.to_string(),
            found: operands[1].ty.to_string(),
        })?;
    let a = materialize(sess, &operands[0])?;
    let ap = a.regs()[0];
    match op {
        "mul" => {
            // imul has a true three-operand immediate form.
            let dst = if sess.regs.can_destruct(ap) {
                ap
            } else {
                sess.regs.acquire(ap.class)?
            };
            sess.asm
                .inst3("imul", reg_name(dst), reg_name(ap), format!("{value}"));
            release_input(sess, ap, dst)?;
            Ok(Some(Operand::reg(ty, dst)))
        }
        _ => {
            let (dst, _reused) = dst_for(sess, ty.elem(), ap, true)?;
            let mn = if op == "add" { "add" } else { "sub" };
            sess.asm.inst2(mn, reg_name(dst), format!("{value}"));
            release_input(sess, ap, dst)?;
            Ok(Some(Operand::reg(ty, dst)))
        }
    }
}

/// Scalar integer min/max via compare and conditional move.
fn lower_int_scalar_minmax(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let ap = a.regs()[0];
    let bp = b.regs()[0];
    let (dst, _reused) = dst_for(sess, ty.elem(), ap, true)?;
    sess.asm.inst2("cmp", reg_name(dst), reg_name(bp));
    // min keeps the smaller: replace when dst > src. max mirrors.
    let cmov = if op == "min" { "cmovg" } else { "cmovl" };
    sess.asm.inst2(cmov, reg_name(dst), reg_name(bp));
    release_input(sess, ap, dst)?;
    release_input(sess, bp, dst)?;
    Ok(Operand::reg(ty, dst))
}

/// 64-bit lane min/max below AVX-512: compare, then bitwise recombination.
fn lower_i64_vector_minmax(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let tier = sess.tier();
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        let mask = sess.regs.acquire(ap.class)?;
        let out = sess.regs.acquire(ap.class)?;
        let (m, o) = (reg_name(mask), reg_name(out));
        let (an, bn) = (reg_name(ap), reg_name(bp));
        // mask = a > b; min = (b & mask) | (a & !mask), max swaps a and b.
        let (take_if_gt, take_if_le) = if op == "min" {
            (reg_name(bp), reg_name(ap))
        } else {
            (reg_name(ap), reg_name(bp))
        };
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vpcmpgtq", &m, &an, &bn);
            sess.asm.inst3("vpand", &o, &m, &take_if_gt);
            sess.asm.inst3("vpandn", &m, &m, &take_if_le);
            sess.asm.inst3("vpor", &o, &o, &m);
        } else {
            emit_copy(sess, ScalarType::I64, mask, ap);
            sess.asm.inst2("pcmpgtq", &m, &bn);
            sess.asm.inst2("movdqa", &o, &take_if_gt);
            sess.asm.inst2("pand", &o, &m);
            sess.asm.inst2("pandn", &m, &take_if_le);
            sess.asm.inst2("por", &o, &m);
        }
        release_input(sess, ap, out)?;
        release_input(sess, bp, out)?;
        sess.regs.release(mask)?;
        parts.push(out);
    }
    Ok(Operand::parts(ty, parts))
}

/// Unary operators: neg, abs, sqrt.
fn lower_unary(sess: &mut Session, op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    match (op, ty) {
        ("sqrt", ValueType::Scalar(elem)) => {
            let mn = match elem {
                ScalarType::F32 => "sqrtss",
                _ => "sqrtsd",
            };
            lower_unary_move(sess, &format!("{}{}", vp(sess.tier()), mn), operands).map(Some)
        }
        ("sqrt", _) => {
            let mn = match ty.elem() {
                ScalarType::F32 => "sqrtps",
                _ => "sqrtpd",
            };
            lower_unary_move(sess, &format!("{}{}", vp(sess.tier()), mn), operands).map(Some)
        }
        ("neg", ValueType::Scalar(elem)) if !elem.is_float() => {
            let a = materialize(sess, &operands[0])?;
            let ap = a.regs()[0];
            let (dst, _reused) = dst_for(sess, elem, ap, true)?;
            sess.asm.inst1("neg", reg_name(dst));
            release_input(sess, ap, dst)?;
            Ok(Some(Operand::reg(ty, dst)))
        }
        ("abs", ValueType::Scalar(elem)) if !elem.is_float() => {
            lower_int_scalar_abs(sess, elem, operands).map(Some)
        }
        ("neg", _) if ty.elem().is_float() => lower_float_signbit(sess, "xor", operands).map(Some),
        ("abs", _) if ty.elem().is_float() => lower_float_signbit(sess, "and", operands).map(Some),
        ("neg", _) => lower_int_vector_neg(sess, operands).map(Some),
        ("abs", _) => lower_int_vector_abs(sess, operands).map(Some),
        _ => Err(CodegenError::UnsupportedOperation {
            op: op.to_string(),
            ty: ty.to_string(),
        }),
    }
}

/// Non-destructive unary instruction (sqrt family): plain two-operand form
/// at every tier.
fn lower_unary_move(sess: &mut Session, mn: &str, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let dst = if sess.regs.can_destruct(ap) {
            ap
        } else {
            sess.regs.acquire(ap.class)?
        };
        sess.asm.inst2(mn, reg_name(dst), reg_name(ap));
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}

/// Float neg/abs: flip or clear the sign bit with a materialized bit mask.
/// No comparison, no branch.
fn lower_float_signbit(
    sess: &mut Session,
    logic: &str,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let a = materialize(sess, &operands[0])?;
    let class = a.regs()[0].class;

    let bits: u64 = match (logic, elem) {
        ("xor", ScalarType::F32) => 0x8000_0000,
        ("xor", _) => 0x8000_0000_0000_0000,
        (_, ScalarType::F32) => 0x7FFF_FFFF,
        (_, _) => 0x7FFF_FFFF_FFFF_FFFF,
    };
    let mask = materialize_lane_mask(sess, elem, class, bits)?;

    let mn_base = match (logic, elem) {
        ("xor", ScalarType::F32) => "xorps",
        ("xor", _) => "xorpd",
        (_, ScalarType::F32) => "andps",
        (_, _) => "andpd",
    };
    let mn = format!("{}{}", vp(tier), mn_base);
    let three_op = tier >= Tier::Avx2;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm
                .inst3(&mn, reg_name(dst), reg_name(ap), reg_name(mask));
        } else {
            sess.asm.inst2(&mn, reg_name(dst), reg_name(mask));
        }
        release_input(sess, ap, dst)?;
        parts.push(dst);
    }
    sess.regs.release(mask)?;
    Ok(Operand::parts(ty, parts))
}

/// Materialize a per-lane bit mask (same pattern in every lane) into a
/// vector register of the given class.
pub(crate) fn materialize_lane_mask(
    sess: &mut Session,
    elem: ScalarType,
    class: RegClass,
    bits: u64,
) -> CodegenResult<PhysReg> {
    let tier = sess.tier();
    let mask = sess.regs.acquire(class)?;
    let mask_x = mask.reclassed(RegClass::Xmm);
    if elem.byte_size() == 4 {
        let gp = sess.regs.acquire(RegClass::Gp32)?;
        sess.asm
            .inst2("mov", reg_name(gp), format!("0x{:08x}", bits as u32));
        sess.asm
            .inst2(&format!("{}movd", vp(tier)), reg_name(mask_x), reg_name(gp));
        sess.regs.release(gp)?;
    } else {
        let gp = sess.regs.acquire(RegClass::Gp64)?;
        sess.asm.inst2("mov", reg_name(gp), format!("0x{bits:016x}"));
        sess.asm
            .inst2(&format!("{}movq", vp(tier)), reg_name(mask_x), reg_name(gp));
        sess.regs.release(gp)?;
    }
    super::loadstore::emit_broadcast(sess, elem, mask);
    Ok(mask)
}

/// Integer vector negate: subtract from zero.
fn lower_int_vector_neg(sess: &mut Session, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let sub = if elem.byte_size() == 4 { "psubd" } else { "psubq" };
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let zero = sess.regs.acquire(ap.class)?;
        let (z, an) = (reg_name(zero), reg_name(ap));
        if tier >= Tier::Avx2 {
            let xor = if ap.class == RegClass::Zmm {
                if elem.byte_size() == 8 { "vpxorq" } else { "vpxord" }
            } else {
                "vpxor"
            };
            sess.asm.inst3(xor, &z, &z, &z);
            sess.asm.inst3(&format!("v{sub}"), &z, &z, &an);
        } else {
            sess.asm.inst2("pxor", &z, &z);
            sess.asm.inst2(sub, &z, &an);
        }
        release_input(sess, ap, zero)?;
        parts.push(zero);
    }
    Ok(Operand::parts(ty, parts))
}

/// Integer vector absolute value: pabsd for 32-bit lanes; 64-bit lanes use
/// the compare/xor/subtract synthesis below AVX-512.
fn lower_int_vector_abs(sess: &mut Session, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let tier = sess.tier();
    if ty.elem() == ScalarType::I32 {
        return lower_unary_move(sess, &format!("{}pabsd", vp(tier)), operands);
    }
    if tier >= Tier::Avx512 {
        return lower_unary_move(sess, "vpabsq", operands);
    }
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let sign = sess.regs.acquire(ap.class)?;
        let (s, an) = (reg_name(sign), reg_name(ap));
        let (dst, _reused) = dst_for(sess, ScalarType::I64, ap, tier < Tier::Avx2)?;
        let d = reg_name(dst);
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vpxor", &s, &s, &s);
            sess.asm.inst3("vpcmpgtq", &s, &s, &an);
            sess.asm.inst3("vpxor", &d, &an, &s);
            sess.asm.inst3("vpsubq", &d, &d, &s);
        } else {
            sess.asm.inst2("pxor", &s, &s);
            sess.asm.inst2("pcmpgtq", &s, &d);
            sess.asm.inst2("pxor", &d, &s);
            sess.asm.inst2("psubq", &d, &s);
        }
        release_input(sess, ap, dst)?;
        sess.regs.release(sign)?;
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}

/// Scalar integer abs: sign spread, xor, subtract.
fn lower_int_scalar_abs(
    sess: &mut Session,
    elem: ScalarType,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let a = materialize(sess, &operands[0])?;
    let ap = a.regs()[0];
    let (dst, _reused) = dst_for(sess, elem, ap, true)?;
    let sign = sess.regs.acquire(dst.class)?;
    let shift = if elem.byte_size() == 4 { "31" } else { "63" };
    sess.asm.inst2("mov", reg_name(sign), reg_name(dst));
    sess.asm.inst2("sar", reg_name(sign), shift);
    sess.asm.inst2("xor", reg_name(dst), reg_name(sign));
    sess.asm.inst2("sub", reg_name(dst), reg_name(sign));
    sess.regs.release(sign)?;
    release_input(sess, ap, dst)?;
    Ok(Operand::parts(ty, vec![dst]))
}

/// Acquire a general-purpose scratch register outside the rax/rdx pair the
/// divide clobbers.
fn acquire_div_scratch(sess: &mut Session, class: RegClass) -> CodegenResult<PhysReg> {
    let mut rejected = Vec::new();
    let reg = loop {
        let r = sess.regs.acquire(class)?;
        if r.index != 0 && r.index != 2 {
            break r;
        }
        rejected.push(r);
    };
    for r in rejected {
        sess.regs.release(r)?;
    }
    Ok(reg)
}

/// Scalar integer division: the ISA mandates the rdx:rax pair. Operands
/// already occupying rax or rdx are moved aside, and foreign values in
/// those registers are saved and restored around the division.
fn lower_int_div(sess: &mut Session, operands: &[Operand]) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let wide = ty.elem().byte_size() == 8;
    let class = if wide { RegClass::Gp64 } else { RegClass::Gp32 };
    const RAX: u8 = 0;
    const RDX: u8 = 2;

    let rax = PhysReg::new(class, RAX);
    let rdx = PhysReg::new(class, RDX);

    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let ap = a.regs()[0];
    let mut bp = b.regs()[0];

    // The divisor must not sit in rax or rdx.
    if bp.index == RAX || bp.index == RDX {
        let moved = acquire_div_scratch(sess, class)?;
        sess.asm.inst2("mov", reg_name(moved), reg_name(bp));
        release_input(sess, bp, moved)?;
        bp = moved;
    }

    // Bring the dividend into rax, preserving whatever lives there: a
    // foreign operand's value, or the dividend itself when it must survive.
    let mut saved_rax = None;
    let mut claimed_rax = false;
    if ap.index == RAX {
        if !sess.regs.can_destruct(ap) {
            let save = acquire_div_scratch(sess, class)?;
            sess.asm.inst2("mov", reg_name(save), reg_name(rax));
            saved_rax = Some(save);
        }
    } else {
        if sess.regs.is_free(class, RAX) {
            sess.regs.acquire_named(class, RAX)?;
            claimed_rax = true;
        } else {
            let save = acquire_div_scratch(sess, class)?;
            sess.asm.inst2("mov", reg_name(save), reg_name(rax));
            saved_rax = Some(save);
        }
        sess.asm.inst2("mov", reg_name(rax), reg_name(ap));
        if sess.regs.can_destruct(ap) {
            sess.regs.release(ap)?;
        }
    }

    // rdx is clobbered with the remainder; save any foreign value.
    let mut saved_rdx = None;
    let mut claimed_rdx = false;
    if sess.regs.is_free(class, RDX) {
        sess.regs.acquire_named(class, RDX)?;
        claimed_rdx = true;
    } else {
        let save = acquire_div_scratch(sess, class)?;
        sess.asm.inst2("mov", reg_name(save), reg_name(rdx));
        saved_rdx = Some(save);
    }

    sess.asm.emit(if wide { "cqo" } else { "cdq" });
    sess.asm.inst1("idiv", reg_name(bp));

    let dst = sess.regs.acquire(class)?;
    sess.asm.inst2("mov", reg_name(dst), reg_name(rax));

    // Restore saved values and drop our claims.
    if let Some(save) = saved_rax {
        sess.asm.inst2("mov", reg_name(rax), reg_name(save));
        sess.regs.release(save)?;
    } else if ap.index == RAX && sess.regs.can_destruct(ap) {
        sess.regs.release(ap)?;
    }
    if claimed_rax {
        sess.regs.release(rax)?;
    }
    if let Some(save) = saved_rdx {
        sess.asm.inst2("mov", reg_name(rdx), reg_name(save));
        sess.regs.release(save)?;
    }
    if claimed_rdx {
        sess.regs.release(rdx)?;
    }
    if sess.regs.can_destruct(bp) {
        sess.regs.release(bp)?;
    }
    Ok(Operand::reg(ty, dst))
}
