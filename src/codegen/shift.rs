// This module implements the shift lowering strategies. Scalar shifts by a
// register count route the count through cl, the register the ISA mandates
// for variable shifts: a value already occupying rcx is swapped to a
// temporary rather than faulting, and a foreign value in rcx is saved and
// restored around the shift. Vector shifts take either an immediate count or
// a broadcast scalar count moved into the low lanes of a vector register;
// every lane shifts by the same amount. Arithmetic right shift of 64-bit
// lanes has no instruction below AVX-512, so it is synthesized from a
// logical shift and a sign-mask fill with identical semantics at every tier.

//! Shift lowering: immediate, scalar-count, and the cl routing rules.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::{reg_name, reg_name_8};

use super::arith::{dst_for, release_input};
use super::dispatch::{all_value_types, ArgPat, Gate, Registry};
use super::loadstore::{materialize, vp};

/// rcx/ecx index in the general-purpose file.
const RCX: u8 = 1;

pub(crate) fn install(reg: &mut Registry) {
    let count_ty = ValueType::Scalar(ScalarType::I32);
    for ty in all_value_types() {
        if ty.elem().is_float() {
            continue;
        }
        for op in ["shl", "shr", "sar"] {
            reg.register(
                op,
                vec![ArgPat::Exact(ty), ArgPat::Const(ScalarType::I32)],
                Gate::ConstCombine,
                lower_shift_imm,
            );
            reg.register(
                op,
                vec![ArgPat::Exact(ty), ArgPat::Exact(count_ty)],
                Gate::None,
                lower_shift_var,
            );
        }
    }
}

fn gp_shift_mn(op: &str) -> &'static str {
    match op {
        "shl" => "shl",
        "shr" => "shr",
        _ => "sar",
    }
}

/// Packed shift mnemonic base for the lane width; arithmetic-right on
/// 64-bit lanes is the synthesized case and never reaches here below
/// AVX-512.
fn packed_shift_mn(op: &str, elem: ScalarType) -> &'static str {
    match (op, elem.byte_size()) {
        ("shl", 4) => "pslld",
        ("shl", _) => "psllq",
        ("shr", 4) => "psrld",
        ("shr", _) => "psrlq",
        ("sar", 4) => "psrad",
        (_, _) => "vpsraq",
    }
}

fn lower_shift_imm(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let count = operands[1]
        .const_value()
        .and_then(|v| v.as_int())
        .ok_or_else(|| CodegenError::TypeMismatch {
            op: op.to_string(),
            found: operands[1].ty.to_string(),
        })? as u32;

    if let ValueType::Scalar(elem) = ty {
        let a = materialize(sess, &operands[0])?;
        let ap = a.regs()[0];
        let (dst, _reused) = dst_for(sess, elem, ap, true)?;
        sess.asm
            .inst2(gp_shift_mn(op), reg_name(dst), format!("{count}"));
        release_input(sess, ap, dst)?;
        return Ok(Some(Operand::reg(ty, dst)));
    }

    let elem = ty.elem();
    if op == "sar" && elem == ScalarType::I64 && sess.tier() < Tier::Avx512 {
        return lower_sar64_imm(sess, operands, count).map(Some);
    }

    let tier = sess.tier();
    let three_op = tier >= Tier::Avx2;
    let base = packed_shift_mn(op, elem);
    let mn = if base.starts_with('v') {
        base.to_string()
    } else {
        format!("{}{}", vp(tier), base)
    };
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm
                .inst3(&mn, reg_name(dst), reg_name(ap), format!("{count}"));
        } else {
            sess.asm.inst2(&mn, reg_name(dst), format!("{count}"));
        }
        release_input(sess, ap, dst)?;
        parts.push(dst);
    }
    Ok(Some(Operand::parts(ty, parts)))
}

fn lower_shift_var(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    if operands[0].ty.elem().is_float() {
        return Err(CodegenError::UnsupportedOperation {
            op: op.to_string(),
            ty: operands[0].ty.to_string(),
        });
    }
    if operands[0].ty.is_scalar() {
        lower_gp_shift_var(sess, op, operands).map(Some)
    } else {
        lower_packed_shift_var(sess, op, operands).map(Some)
    }
}

/// Scalar shift by register count: the count goes through cl.
fn lower_gp_shift_var(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let ap = a.regs()[0];
    let bp = b.regs()[0];
    let rcx_full = PhysReg::new(RegClass::Gp64, RCX);

    let mut saved_rcx: Option<PhysReg> = None;
    let mut claimed_rcx: Option<PhysReg> = None;

    // A value sitting in rcx is swapped to a temporary rather than faulting
    // when the count is moved in.
    let dst;
    if ap.index == RCX {
        dst = sess.regs.acquire(ap.class)?;
        sess.asm.inst2("mov", reg_name(dst), reg_name(ap));
        if sess.regs.can_destruct(ap) {
            sess.regs.release(ap)?;
        } else {
            let save = sess.regs.acquire(RegClass::Gp64)?;
            sess.asm.inst2("mov", reg_name(save), reg_name(rcx_full));
            saved_rcx = Some(save);
        }
    } else {
        let (d, _reused) = dst_for(sess, elem, ap, true)?;
        dst = d;
    }

    // Bring the count into cl.
    if bp.index != RCX {
        if sess.regs.is_free(RegClass::Gp32, RCX) {
            claimed_rcx = Some(sess.regs.acquire_named(RegClass::Gp32, RCX)?);
        } else if saved_rcx.is_none() {
            let save = sess.regs.acquire(RegClass::Gp64)?;
            sess.asm.inst2("mov", reg_name(save), reg_name(rcx_full));
            saved_rcx = Some(save);
        }
        sess.asm.inst2(
            "mov",
            reg_name(PhysReg::new(RegClass::Gp32, RCX)),
            reg_name(bp.reclassed(RegClass::Gp32)),
        );
    }

    sess.asm
        .inst2(gp_shift_mn(op), reg_name(dst), reg_name_8(rcx_full));

    if ap.index != RCX {
        release_input(sess, ap, dst)?;
    }
    release_input(sess, bp, dst)?;
    if let Some(save) = saved_rcx {
        sess.asm.inst2("mov", reg_name(rcx_full), reg_name(save));
        sess.regs.release(save)?;
    }
    if let Some(claim) = claimed_rcx {
        sess.regs.release(claim)?;
    }
    Ok(Operand::reg(ty, dst))
}

/// Vector shift by a broadcast scalar count: the count moves into the low
/// lanes of a vector register and every lane shifts by it.
fn lower_packed_shift_var(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();

    let b = materialize(sess, &operands[1])?;
    let bp = b.regs()[0];
    let cnt = sess.regs.acquire(RegClass::Xmm)?;
    sess.asm.inst2(
        &format!("{}movd", vp(tier)),
        reg_name(cnt),
        reg_name(bp.reclassed(RegClass::Gp32)),
    );
    if sess.regs.can_destruct(bp) {
        sess.regs.release(bp)?;
    }

    if op == "sar" && elem == ScalarType::I64 && tier < Tier::Avx512 {
        let out = lower_sar64_var(sess, operands, cnt)?;
        sess.regs.release(cnt)?;
        return Ok(out);
    }

    let three_op = tier >= Tier::Avx2;
    let base = packed_shift_mn(op, elem);
    let mn = if base.starts_with('v') {
        base.to_string()
    } else {
        format!("{}{}", vp(tier), base)
    };
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm
                .inst3(&mn, reg_name(dst), reg_name(ap), reg_name(cnt));
        } else {
            sess.asm.inst2(&mn, reg_name(dst), reg_name(cnt));
        }
        release_input(sess, ap, dst)?;
        parts.push(dst);
    }
    sess.regs.release(cnt)?;
    Ok(Operand::parts(ty, parts))
}

/// Arithmetic right shift of 64-bit lanes by an immediate, below AVX-512:
/// `(x >>> n) | ((0 > x) << (64 - n))`.
fn lower_sar64_imm(
    sess: &mut Session,
    operands: &[Operand],
    count: u32,
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let tier = sess.tier();
    let a = materialize(sess, &operands[0])?;
    let fill = 64 - count;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let sign = sess.regs.acquire(ap.class)?;
        let (dst, _reused) = dst_for(sess, ScalarType::I64, ap, tier < Tier::Avx2)?;
        let (s, d, an) = (reg_name(sign), reg_name(dst), reg_name(ap));
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vpxor", &s, &s, &s);
            sess.asm.inst3("vpcmpgtq", &s, &s, &an);
            sess.asm.inst3("vpsrlq", &d, &an, format!("{count}"));
            sess.asm.inst3("vpsllq", &s, &s, format!("{fill}"));
            sess.asm.inst3("vpor", &d, &d, &s);
        } else {
            sess.asm.inst2("pxor", &s, &s);
            sess.asm.inst2("pcmpgtq", &s, &d);
            sess.asm.inst2("psrlq", &d, format!("{count}"));
            sess.asm.inst2("psllq", &s, format!("{fill}"));
            sess.asm.inst2("por", &d, &s);
        }
        release_input(sess, ap, dst)?;
        sess.regs.release(sign)?;
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}

/// Same synthesis with the count in a vector register; the fill amount is
/// computed as `64 - n` alongside it.
fn lower_sar64_var(
    sess: &mut Session,
    operands: &[Operand],
    cnt: PhysReg,
) -> CodegenResult<Operand> {
    let ty = operands[0].ty;
    let tier = sess.tier();
    let a = materialize(sess, &operands[0])?;

    // fill = 64 - n, in its own vector register.
    let fill = sess.regs.acquire(RegClass::Xmm)?;
    let gp = sess.regs.acquire(RegClass::Gp64)?;
    sess.asm.inst2("mov", reg_name(gp), "64");
    sess.asm
        .inst2(&format!("{}movq", vp(tier)), reg_name(fill), reg_name(gp));
    sess.regs.release(gp)?;
    if tier >= Tier::Avx2 {
        sess.asm
            .inst3("vpsubq", reg_name(fill), reg_name(fill), reg_name(cnt));
    } else {
        sess.asm.inst2("psubq", reg_name(fill), reg_name(cnt));
    }

    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let sign = sess.regs.acquire(ap.class)?;
        let (dst, _reused) = dst_for(sess, ScalarType::I64, ap, tier < Tier::Avx2)?;
        let (s, d, an) = (reg_name(sign), reg_name(dst), reg_name(ap));
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vpxor", &s, &s, &s);
            sess.asm.inst3("vpcmpgtq", &s, &s, &an);
            sess.asm.inst3("vpsrlq", &d, &an, reg_name(cnt));
            sess.asm.inst3("vpsllq", &s, &s, reg_name(fill));
            sess.asm.inst3("vpor", &d, &d, &s);
        } else {
            sess.asm.inst2("pxor", &s, &s);
            sess.asm.inst2("pcmpgtq", &s, &d);
            sess.asm.inst2("psrlq", &d, reg_name(cnt));
            sess.asm.inst2("psllq", &s, reg_name(fill));
            sess.asm.inst2("por", &d, &s);
        }
        release_input(sess, ap, dst)?;
        sess.regs.release(sign)?;
        parts.push(dst);
    }
    sess.regs.release(fill)?;
    Ok(Operand::parts(ty, parts))
}
