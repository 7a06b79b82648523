// This module implements the type conversion strategies: int<->float,
// float widen/narrow, and integer widen/narrow, for scalars and vectors at
// every tier. Conversions are the one place where the part counts of source
// and result differ: widening a 4-byte-element vector doubles its byte
// size, so each source part feeds one or two result parts (converting the
// low half directly and the high half through an extract), and narrowing
// mirrors that by combining the low-half results of two source parts into
// one register. 64-bit integer <-> double conversions have no vector
// instruction below AVX-512DQ and are synthesized per lane through a
// general-purpose register, with identical truncation semantics at every
// tier. Float->int conversions always truncate.

//! Type conversions: widening, narrowing, int<->float.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::reg_name;

use super::dispatch::{all_value_types, ArgPat, Gate, Registry};
use super::loadstore::{materialize, vp};

pub(crate) fn install(reg: &mut Registry) {
    for ty in all_value_types() {
        for (target, op) in [
            (ScalarType::I32, "to_i32"),
            (ScalarType::I64, "to_i64"),
            (ScalarType::F32, "to_f32"),
            (ScalarType::F64, "to_f64"),
        ] {
            if target == ty.elem() || !pair_supported(ty.elem(), target) {
                continue;
            }
            reg.register(op, vec![ArgPat::Exact(ty)], Gate::None, lower_convert);
        }
    }
}

/// Conversion pairs the backend lowers. i64<->f32 is deliberately absent:
/// the precision cliff makes it a trap, and no kernel in the operation
/// vocabulary needs it.
fn pair_supported(src: ScalarType, dst: ScalarType) -> bool {
    !matches!(
        (src, dst),
        (ScalarType::I64, ScalarType::F32) | (ScalarType::F32, ScalarType::I64)
    )
}

fn target_of(op: &str) -> ScalarType {
    match op {
        "to_i32" => ScalarType::I32,
        "to_i64" => ScalarType::I64,
        "to_f32" => ScalarType::F32,
        _ => ScalarType::F64,
    }
}

fn half_class(class: RegClass) -> RegClass {
    match class {
        RegClass::Zmm => RegClass::Ymm,
        RegClass::Ymm => RegClass::Xmm,
        other => other,
    }
}

fn lower_convert(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let src_ty = operands[0].ty;
    let dst_elem = target_of(op);
    match src_ty {
        ValueType::Scalar(src_elem) => {
            lower_convert_scalar(sess, src_elem, dst_elem, operands).map(Some)
        }
        ValueType::Vector { elem, lanes } => {
            let dst_ty = ValueType::Vector {
                elem: dst_elem,
                lanes,
            };
            lower_convert_vector(sess, elem, dst_ty, operands).map(Some)
        }
        ValueType::Mask { .. } => Err(CodegenError::UnsupportedOperation {
            op: op.to_string(),
            ty: src_ty.to_string(),
        }),
    }
}

fn lower_convert_scalar(
    sess: &mut Session,
    src_elem: ScalarType,
    dst_elem: ScalarType,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let tier = sess.tier();
    let v = vp(tier);
    let dst_ty = ValueType::Scalar(dst_elem);
    let a = materialize(sess, &operands[0])?;
    let ap = a.regs()[0];

    let result = match (src_elem, dst_elem) {
        (ScalarType::I32, ScalarType::I64) => {
            let dst = sess.regs.acquire(RegClass::Gp64)?;
            sess.asm.inst2(
                "movsxd",
                reg_name(dst),
                reg_name(ap.reclassed(RegClass::Gp32)),
            );
            dst
        }
        (ScalarType::I64, ScalarType::I32) => {
            let dst = sess.regs.acquire(RegClass::Gp32)?;
            sess.asm.inst2(
                "mov",
                reg_name(dst),
                reg_name(ap.reclassed(RegClass::Gp32)),
            );
            dst
        }
        (ScalarType::I32 | ScalarType::I64, _) => {
            let mn = if dst_elem == ScalarType::F32 {
                "cvtsi2ss"
            } else {
                "cvtsi2sd"
            };
            let dst = sess.regs.acquire(RegClass::Xmm)?;
            if tier >= Tier::Avx2 {
                sess.asm
                    .inst3(&format!("v{mn}"), reg_name(dst), reg_name(dst), reg_name(ap));
            } else {
                sess.asm.inst2(mn, reg_name(dst), reg_name(ap));
            }
            dst
        }
        (ScalarType::F32, ScalarType::I32)
        | (ScalarType::F64, ScalarType::I32)
        | (ScalarType::F64, ScalarType::I64) => {
            let mn = if src_elem == ScalarType::F32 {
                "cvttss2si"
            } else {
                "cvttsd2si"
            };
            let class = if dst_elem == ScalarType::I32 {
                RegClass::Gp32
            } else {
                RegClass::Gp64
            };
            let dst = sess.regs.acquire(class)?;
            sess.asm
                .inst2(&format!("{v}{mn}"), reg_name(dst), reg_name(ap));
            dst
        }
        (ScalarType::F32, ScalarType::F64) | (ScalarType::F64, ScalarType::F32) => {
            let mn = if src_elem == ScalarType::F32 {
                "cvtss2sd"
            } else {
                "cvtsd2ss"
            };
            let dst = sess.regs.acquire(RegClass::Xmm)?;
            if tier >= Tier::Avx2 {
                sess.asm
                    .inst3(&format!("v{mn}"), reg_name(dst), reg_name(dst), reg_name(ap));
            } else {
                sess.asm.inst2(mn, reg_name(dst), reg_name(ap));
            }
            dst
        }
        _ => {
            return Err(CodegenError::UnsupportedOperation {
                op: format!("to_{}", dst_elem.name()),
                ty: operands[0].ty.to_string(),
            })
        }
    };
    if sess.regs.can_destruct(ap) {
        sess.regs.release(ap)?;
    }
    Ok(Operand::reg(dst_ty, result))
}

fn lower_convert_vector(
    sess: &mut Session,
    src_elem: ScalarType,
    dst_ty: ValueType,
    operands: &[Operand],
) -> CodegenResult<Operand> {
    let tier = sess.tier();
    let dst_elem = dst_ty.elem();
    let a = materialize(sess, &operands[0])?;

    let parts = match (src_elem, dst_elem) {
        // Same lane width: one instruction per part.
        (ScalarType::I32, ScalarType::F32) => {
            convert_same_width(sess, &a, dst_ty, &format!("{}cvtdq2ps", vp(tier)))?
        }
        (ScalarType::F32, ScalarType::I32) => {
            convert_same_width(sess, &a, dst_ty, &format!("{}cvttps2dq", vp(tier)))?
        }
        (ScalarType::I64, ScalarType::F64) if tier == Tier::Avx512 => {
            convert_same_width(sess, &a, dst_ty, "vcvtqq2pd")?
        }
        (ScalarType::F64, ScalarType::I64) if tier == Tier::Avx512 => {
            convert_same_width(sess, &a, dst_ty, "vcvttpd2qq")?
        }
        (ScalarType::I64, ScalarType::F64) => convert_qq_pd_lanes(sess, &a, dst_ty, true)?,
        (ScalarType::F64, ScalarType::I64) => convert_qq_pd_lanes(sess, &a, dst_ty, false)?,

        // Widening: 4-byte lanes to 8-byte lanes.
        (ScalarType::F32, ScalarType::F64) => {
            convert_widen(sess, &a, dst_ty, &format!("{}cvtps2pd", vp(tier)), true)?
        }
        (ScalarType::I32, ScalarType::F64) => {
            convert_widen(sess, &a, dst_ty, &format!("{}cvtdq2pd", vp(tier)), false)?
        }
        (ScalarType::I32, ScalarType::I64) => {
            convert_widen(sess, &a, dst_ty, &format!("{}pmovsxdq", vp(tier)), false)?
        }

        // Narrowing: 8-byte lanes to 4-byte lanes.
        (ScalarType::F64, ScalarType::F32) => {
            convert_narrow(sess, &a, dst_ty, &format!("{}cvtpd2ps", vp(tier)), true)?
        }
        (ScalarType::F64, ScalarType::I32) => {
            convert_narrow(sess, &a, dst_ty, &format!("{}cvttpd2dq", vp(tier)), false)?
        }
        (ScalarType::I64, ScalarType::I32) => convert_narrow_qd(sess, &a, dst_ty)?,

        _ => {
            return Err(CodegenError::UnsupportedOperation {
                op: format!("to_{}", dst_elem.name()),
                ty: a.ty.to_string(),
            })
        }
    };

    for &r in a.regs() {
        if sess.regs.can_destruct(r) {
            sess.regs.release(r)?;
        }
    }
    Ok(Operand::parts(dst_ty, parts))
}

/// Lane-width-preserving conversion: part counts match one to one.
fn convert_same_width(
    sess: &mut Session,
    a: &Operand,
    dst_ty: ValueType,
    mn: &str,
) -> CodegenResult<Vec<PhysReg>> {
    let class = dst_ty.part_class(sess.tier());
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let dst = sess.regs.acquire(class)?;
        sess.asm.inst2(mn, reg_name(dst), reg_name(ap));
        parts.push(dst);
    }
    Ok(parts)
}

/// Widening conversion: each source part feeds one result part (converting
/// its low half) or two (low half, then the high half via an extract).
pub(crate) fn convert_widen(
    sess: &mut Session,
    a: &Operand,
    dst_ty: ValueType,
    mn: &str,
    float_src: bool,
) -> CodegenResult<Vec<PhysReg>> {
    let tier = sess.tier();
    let dst_class = dst_ty.part_class(tier);
    let dpp = dst_ty.part_count(tier) as usize;
    let spp = a.regs().len();
    let mut parts = Vec::with_capacity(dpp);

    if dpp == spp {
        for &ap in a.regs() {
            let dst = sess.regs.acquire(dst_class)?;
            let src_name = reg_name(ap.reclassed(half_class(dst_class)));
            sess.asm.inst2(mn, reg_name(dst), &src_name);
            parts.push(dst);
        }
        return Ok(parts);
    }

    // Two result parts per source part: the low half converts directly,
    // the high half goes through an extract into a half-width temporary.
    for &ap in a.regs() {
        let lo = sess.regs.acquire(dst_class)?;
        sess.asm
            .inst2(mn, reg_name(lo), reg_name(ap.reclassed(half_class(dst_class))));
        parts.push(lo);
        if parts.len() == dpp {
            break;
        }
        let tmp = extract_high_half(sess, ap, float_src)?;
        let hi = sess.regs.acquire(dst_class)?;
        sess.asm.inst2(mn, reg_name(hi), reg_name(tmp));
        sess.regs.release(tmp)?;
        parts.push(hi);
        if parts.len() == dpp {
            break;
        }
    }
    Ok(parts)
}

/// Extract the high half of a vector register into a fresh half-width
/// temporary owned by the caller.
fn extract_high_half(sess: &mut Session, src: PhysReg, float_src: bool) -> CodegenResult<PhysReg> {
    match src.class {
        RegClass::Zmm => {
            let tmp = sess.regs.acquire(RegClass::Ymm)?;
            let mn = if float_src { "vextractf64x4" } else { "vextracti64x4" };
            sess.asm.inst3(mn, reg_name(tmp), reg_name(src), "1");
            Ok(tmp)
        }
        RegClass::Ymm => {
            let tmp = sess.regs.acquire(RegClass::Xmm)?;
            let mn = if float_src { "vextractf128" } else { "vextracti128" };
            sess.asm.inst3(mn, reg_name(tmp), reg_name(src), "1");
            Ok(tmp)
        }
        _ => {
            let tmp = sess.regs.acquire(RegClass::Xmm)?;
            if float_src {
                sess.asm.inst2("movhlps", reg_name(tmp), reg_name(src));
            } else {
                sess.asm
                    .inst3("pshufd", reg_name(tmp), reg_name(src), "0x0e");
            }
            Ok(tmp)
        }
    }
}

/// Narrowing conversion: each result part is built from one source part or
/// from the combined low-half results of two.
fn convert_narrow(
    sess: &mut Session,
    a: &Operand,
    dst_ty: ValueType,
    mn: &str,
    float_dst: bool,
) -> CodegenResult<Vec<PhysReg>> {
    let tier = sess.tier();
    let dst_class = dst_ty.part_class(tier);
    let dpp = dst_ty.part_count(tier) as usize;
    let spp = a.regs().len();
    let mut parts = Vec::with_capacity(dpp);

    if dpp == spp {
        for &ap in a.regs() {
            let dst = sess.regs.acquire(dst_class)?;
            sess.asm.inst2(mn, reg_name(dst), reg_name(ap));
            parts.push(dst);
        }
        return Ok(parts);
    }

    for pair in a.regs().chunks(2) {
        let d0 = sess.regs.acquire(dst_class)?;
        let half = half_class(a.regs()[0].class);
        sess.asm
            .inst2(mn, reg_name(d0.reclassed(half)), reg_name(pair[0]));
        if let Some(&s1) = pair.get(1) {
            let t = sess.regs.acquire(dst_class)?;
            sess.asm
                .inst2(mn, reg_name(t.reclassed(half)), reg_name(s1));
            combine_halves(sess, d0, t, half, float_dst);
            sess.regs.release(t)?;
        }
        parts.push(d0);
    }
    Ok(parts)
}

/// Merge two half-width results into one register: low halves of `d` and
/// `t` become the low and high halves of `d`.
fn combine_halves(sess: &mut Session, d: PhysReg, t: PhysReg, half: RegClass, float_dst: bool) {
    let tier = sess.tier();
    match d.class {
        RegClass::Zmm => {
            let mn = if float_dst {
                "vinsertf64x4"
            } else {
                "vinserti64x4"
            };
            sess.asm.inst4(
                mn,
                reg_name(d),
                reg_name(d),
                reg_name(t.reclassed(RegClass::Ymm)),
                "1",
            );
        }
        RegClass::Ymm => {
            let mn = if float_dst { "vinsertf128" } else { "vinserti128" };
            sess.asm.inst4(
                mn,
                reg_name(d),
                reg_name(d),
                reg_name(t.reclassed(RegClass::Xmm)),
                "1",
            );
        }
        _ => {
            let _ = half;
            if tier >= Tier::Avx2 {
                let mn = if float_dst { "vmovlhps" } else { "vpunpcklqdq" };
                sess.asm.inst3(mn, reg_name(d), reg_name(d), reg_name(t));
            } else {
                let mn = if float_dst { "movlhps" } else { "punpcklqdq" };
                sess.asm.inst2(mn, reg_name(d), reg_name(t));
            }
        }
    }
}

/// 64-bit integer narrow to 32-bit lanes: pick the low dword of each lane.
pub(crate) fn convert_narrow_qd(
    sess: &mut Session,
    a: &Operand,
    dst_ty: ValueType,
) -> CodegenResult<Vec<PhysReg>> {
    let tier = sess.tier();
    if tier == Tier::Avx512 {
        // Dedicated EVEX narrowing move.
        let dst_class = dst_ty.part_class(tier);
        let dpp = dst_ty.part_count(tier) as usize;
        let mut parts = Vec::with_capacity(dpp);
        if dpp == a.regs().len() {
            for &ap in a.regs() {
                let dst = sess.regs.acquire(dst_class)?;
                let half = half_class(ap.class);
                sess.asm
                    .inst2("vpmovqd", reg_name(dst.reclassed(half)), reg_name(ap));
                parts.push(dst);
            }
            return Ok(parts);
        }
        for pair in a.regs().chunks(2) {
            let d0 = sess.regs.acquire(dst_class)?;
            let half = half_class(pair[0].class);
            sess.asm
                .inst2("vpmovqd", reg_name(d0.reclassed(half)), reg_name(pair[0]));
            if let Some(&s1) = pair.get(1) {
                let t = sess.regs.acquire(dst_class)?;
                sess.asm
                    .inst2("vpmovqd", reg_name(t.reclassed(half)), reg_name(s1));
                combine_halves(sess, d0, t, half, false);
                sess.regs.release(t)?;
            }
            parts.push(d0);
        }
        return Ok(parts);
    }

    // Shuffle the low dwords down, then merge pairs.
    let dst_class = dst_ty.part_class(tier);
    let dpp = dst_ty.part_count(tier) as usize;
    let mut lows = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let t = sess.regs.acquire(dst_class)?;
        if ap.class == RegClass::Ymm {
            let hx = sess.regs.acquire(RegClass::Xmm)?;
            sess.asm
                .inst3("vextracti128", reg_name(hx), reg_name(ap), "1");
            sess.asm.inst3(
                "vpshufd",
                reg_name(t.reclassed(RegClass::Xmm)),
                reg_name(ap.reclassed(RegClass::Xmm)),
                "0x08",
            );
            sess.asm.inst3("vpshufd", reg_name(hx), reg_name(hx), "0x08");
            sess.asm.inst3(
                "vpunpcklqdq",
                reg_name(t.reclassed(RegClass::Xmm)),
                reg_name(t.reclassed(RegClass::Xmm)),
                reg_name(hx),
            );
            sess.regs.release(hx)?;
        } else if tier >= Tier::Avx2 {
            sess.asm
                .inst3("vpshufd", reg_name(t), reg_name(ap), "0x08");
        } else {
            sess.asm.inst3("pshufd", reg_name(t), reg_name(ap), "0x08");
        }
        lows.push(t);
    }

    if lows.len() == dpp {
        return Ok(lows);
    }
    let mut parts = Vec::with_capacity(dpp);
    let mut iter = lows.into_iter();
    while let Some(d0) = iter.next() {
        if let Some(t) = iter.next() {
            combine_halves(sess, d0, t, RegClass::Xmm, false);
            sess.regs.release(t)?;
        }
        parts.push(d0);
    }
    Ok(parts)
}

/// Per-lane i64<->f64 conversion below AVX-512: through a general-purpose
/// register, one lane at a time. Truncation semantics match the EVEX form.
fn convert_qq_pd_lanes(
    sess: &mut Session,
    a: &Operand,
    dst_ty: ValueType,
    to_float: bool,
) -> CodegenResult<Vec<PhysReg>> {
    let tier = sess.tier();
    let dst_class = dst_ty.part_class(tier);
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let dst = sess.regs.acquire(dst_class)?;
        if ap.class == RegClass::Ymm {
            let hx = sess.regs.acquire(RegClass::Xmm)?;
            let dx = sess.regs.acquire(RegClass::Xmm)?;
            let extract = if to_float { "vextracti128" } else { "vextractf128" };
            sess.asm.inst3(extract, reg_name(hx), reg_name(ap), "1");
            qq_pd_xmm(sess, ap.reclassed(RegClass::Xmm), dst.reclassed(RegClass::Xmm), to_float)?;
            qq_pd_xmm(sess, hx, dx, to_float)?;
            let insert = if to_float { "vinsertf128" } else { "vinserti128" };
            sess.asm.inst4(
                insert,
                reg_name(dst),
                reg_name(dst),
                reg_name(dx),
                "1",
            );
            sess.regs.release(hx)?;
            sess.regs.release(dx)?;
        } else {
            qq_pd_xmm(sess, ap, dst, to_float)?;
        }
        parts.push(dst);
    }
    Ok(parts)
}

/// Two-lane xmm body of the per-lane synthesis.
fn qq_pd_xmm(sess: &mut Session, src: PhysReg, dst: PhysReg, to_float: bool) -> CodegenResult<()> {
    let tier = sess.tier();
    let v = vp(tier);
    let gp = sess.regs.acquire(RegClass::Gp64)?;
    let (g, s, d) = (reg_name(gp), reg_name(src), reg_name(dst));
    if to_float {
        let t = sess.regs.acquire(RegClass::Xmm)?;
        let tn = reg_name(t);
        sess.asm.inst3(&format!("{v}pextrq"), &g, &s, "0");
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vcvtsi2sd", &d, &d, &g);
        } else {
            sess.asm.inst2("cvtsi2sd", &d, &g);
        }
        sess.asm.inst3(&format!("{v}pextrq"), &g, &s, "1");
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vcvtsi2sd", &tn, &tn, &g);
            sess.asm.inst3("vunpcklpd", &d, &d, &tn);
        } else {
            sess.asm.inst2("cvtsi2sd", &tn, &g);
            sess.asm.inst2("unpcklpd", &d, &tn);
        }
        sess.regs.release(t)?;
    } else {
        let t = sess.regs.acquire(RegClass::Xmm)?;
        let tn = reg_name(t);
        sess.asm.inst2(&format!("{v}cvttsd2si"), &g, &s);
        sess.asm.inst2(&format!("{v}movq"), &d, &g);
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vunpckhpd", &tn, &s, &s);
        } else {
            sess.asm.inst2("movaps", &tn, &s);
            sess.asm.inst2("unpckhpd", &tn, &tn);
        }
        sess.asm.inst2(&format!("{v}cvttsd2si"), &g, &tn);
        if tier >= Tier::Avx2 {
            sess.asm.inst4("vpinsrq", &d, &d, &g, "1");
        } else {
            sess.asm.inst3("pinsrq", &d, &g, "1");
        }
        sess.regs.release(t)?;
    }
    sess.regs.release(gp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::isa::CpuCaps;
    use crate::x64::DataInit;

    fn session(tier: Tier) -> Session {
        Session::new(CpuCaps::for_tier(tier))
    }

    fn value(sess: &mut Session, name: &str, ty: ValueType) -> Operand {
        let init = match ty.elem() {
            ScalarType::F32 => DataInit::F32s(vec![1.5; ty.lanes() as usize]),
            ScalarType::F64 => DataInit::F64s(vec![1.5; ty.lanes() as usize]),
            ScalarType::I32 => DataInit::U32s(vec![3; ty.lanes() as usize]),
            ScalarType::I64 => DataInit::U64s(vec![3; ty.lanes() as usize]),
        };
        let named = sess.define_value(name, ty, init).unwrap();
        sess.apply("load", &[named]).unwrap().result.unwrap()
    }

    #[test]
    fn same_width_conversion() {
        let ty = ValueType::vector(ScalarType::I32, 4);
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("to_f32", &[a]).unwrap();
        assert!(emitted.instructions.iter().any(|l| l.starts_with("cvtdq2ps")));
        let result = emitted.result.unwrap();
        assert_eq!(result.ty, ValueType::vector(ScalarType::F32, 4));
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn float_to_int_truncates() {
        let ty = ValueType::vector(ScalarType::F32, 8);
        let mut sess = session(Tier::Avx2);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("to_i32", &[a]).unwrap();
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("vcvttps2dq")));
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn widen_doubles_part_count_at_baseline() {
        let ty = ValueType::vector(ScalarType::F32, 4);
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("to_f64", &[a]).unwrap();
        let result = emitted.result.unwrap();
        assert_eq!(result.ty, ValueType::vector(ScalarType::F64, 4));
        assert_eq!(result.regs().len(), 2);
        let text = emitted.instructions.join("\n");
        assert!(text.contains("cvtps2pd"), "{text}");
        assert!(text.contains("movhlps"), "high half extract: {text}");
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn widen_is_single_step_above_baseline() {
        let ty = ValueType::vector(ScalarType::F32, 4);
        let mut sess = session(Tier::Avx2);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("to_f64", &[a]).unwrap();
        let result = emitted.result.unwrap();
        assert_eq!(result.regs().len(), 1);
        assert_eq!(result.regs()[0].class, RegClass::Ymm);
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("vcvtps2pd ymm")));
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn narrow_combines_pairs() {
        let ty = ValueType::vector(ScalarType::F64, 4);
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ty);
        assert_eq!(a.regs().len(), 2);
        let emitted = sess.apply("to_f32", &[a]).unwrap();
        let result = emitted.result.unwrap();
        assert_eq!(result.ty, ValueType::vector(ScalarType::F32, 4));
        assert_eq!(result.regs().len(), 1);
        let text = emitted.instructions.join("\n");
        assert!(text.contains("cvtpd2ps"), "{text}");
        assert!(text.contains("movlhps"), "{text}");
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn int_widen_uses_sign_extension() {
        let ty = ValueType::vector(ScalarType::I32, 2);
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("to_i64", &[a]).unwrap();
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("pmovsxdq")));
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn i64_to_f64_is_native_only_at_avx512() {
        let ty = ValueType::vector(ScalarType::I64, 2);
        let mut wide = session(Tier::Avx512);
        let a = value(&mut wide, "a", ty);
        let emitted = wide.apply("to_f64", &[a]).unwrap();
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("vcvtqq2pd")));
        wide.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(wide.live_registers(), 0);

        let mut base = session(Tier::Sse42);
        let a = value(&mut base, "a", ty);
        let emitted = base.apply("to_f64", &[a]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("pextrq"), "{text}");
        assert!(text.contains("cvtsi2sd"), "{text}");
        base.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(base.live_registers(), 0);
    }

    #[test]
    fn scalar_conversions() {
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ValueType::Scalar(ScalarType::I32));
        let emitted = sess.apply("to_i64", &[a]).unwrap();
        assert!(emitted.instructions.iter().any(|l| l.starts_with("movsxd")));
        sess.retire(&emitted.result.unwrap()).unwrap();

        let b = value(&mut sess, "b", ValueType::Scalar(ScalarType::F64));
        let emitted = sess.apply("to_i32", &[b]).unwrap();
        assert!(emitted
            .instructions
            .iter()
            .any(|l| l.starts_with("cvttsd2si")));
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn unregistered_pair_fails_resolution() {
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ValueType::Scalar(ScalarType::I64));
        let err = sess.apply("to_f32", &[a.clone()]).unwrap_err();
        assert!(matches!(err, CodegenError::NoMatchingOverload { .. }));
        sess.retire(&a).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }
}
