// This module implements the rounding trio and the exponent-field
// operations. round/floor/ceil share one lowering parameterized only by the
// 2-bit rounding-control immediate: 0 nearest-even, 1 toward negative
// infinity, 2 toward positive infinity. The same control values feed the
// EVEX vrndscale form at 512 bits, so the three operators never diverge
// structurally. ldexp scales by constructing 2^e directly in the exponent
// field through a general-purpose register. frexp splits into its mantissa
// and unbiased exponent by bit surgery on the IEEE representation (bias
// 1023 for f64, 127 for f32), with a branchless zero special case: the
// generic bit trick would hand back 0.5 for a zero input, so both halves
// are forced to zero through a flag-driven conditional move instead of a
// branch (the backend emits straight-line code only).

//! round/floor/ceil, ldexp, and the frexp pair.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::RegClass;
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::reg_name;

use super::dispatch::{all_value_types, ArgPat, Gate, Registry, FLOAT_SCALARS};
use super::loadstore::{materialize, vp};

/// IEEE exponent biases, as the format defines them.
const BIAS64: i64 = 1023;
const BIAS32: i64 = 127;

pub(crate) fn install(reg: &mut Registry) {
    for ty in all_value_types() {
        if !ty.elem().is_float() {
            continue;
        }
        for op in ["round", "floor", "ceil"] {
            reg.register(op, vec![ArgPat::Exact(ty)], Gate::None, lower_round);
        }
    }
    for elem in FLOAT_SCALARS {
        let fty = ValueType::Scalar(elem);
        let ity = ValueType::Scalar(ScalarType::I32);
        reg.register(
            "ldexp",
            vec![ArgPat::Exact(fty), ArgPat::Exact(ity)],
            Gate::None,
            lower_ldexp,
        );
        reg.register(
            "frexp_mantissa",
            vec![ArgPat::Exact(fty)],
            Gate::None,
            lower_frexp_mantissa,
        );
        reg.register(
            "frexp_exponent",
            vec![ArgPat::Exact(fty)],
            Gate::None,
            lower_frexp_exponent,
        );
    }
}

/// The one place the three operators differ.
fn rounding_control(op: &str) -> &'static str {
    match op {
        "round" => "0",
        "floor" => "1",
        _ => "2",
    }
}

fn lower_round(sess: &mut Session, op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let imm = rounding_control(op);
    let a = materialize(sess, &operands[0])?;
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let dst = if sess.regs.can_destruct(ap) {
            ap
        } else {
            sess.regs.acquire(ap.class)?
        };
        let mn = match (ty.is_scalar(), elem, ap.class) {
            (true, ScalarType::F32, _) => format!("{}roundss", vp(tier)),
            (true, _, _) => format!("{}roundsd", vp(tier)),
            (false, ScalarType::F32, RegClass::Zmm) => "vrndscaleps".to_string(),
            (false, _, RegClass::Zmm) => "vrndscalepd".to_string(),
            (false, ScalarType::F32, _) => format!("{}roundps", vp(tier)),
            (false, _, _) => format!("{}roundpd", vp(tier)),
        };
        if ty.is_scalar() && tier >= Tier::Avx2 {
            // vroundss merges the upper lanes from a first source.
            sess.asm
                .inst4(&mn, reg_name(dst), reg_name(ap), reg_name(ap), imm);
        } else {
            sess.asm.inst3(&mn, reg_name(dst), reg_name(ap), imm);
        }
        parts.push(dst);
    }
    Ok(Some(Operand::parts(ty, parts)))
}

/// `ldexp(x, e) = x * 2^e`, with `2^e` built directly in the exponent
/// field.
fn lower_ldexp(sess: &mut Session, _op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let v = vp(tier);
    let a = materialize(sess, &operands[0])?;
    let e = materialize(sess, &operands[1])?;
    let ap = a.regs()[0];
    let ep = e.regs()[0];

    let scale = sess.regs.acquire(RegClass::Xmm)?;
    let (bias, mant_bits) = match elem {
        ScalarType::F32 => (BIAS32, 23),
        _ => (BIAS64, 52),
    };
    let g = sess.regs.acquire(RegClass::Gp64)?;
    let g32 = g.reclassed(RegClass::Gp32);
    sess.asm
        .inst2("mov", reg_name(g32), reg_name(ep.reclassed(RegClass::Gp32)));
    sess.asm.inst2("add", reg_name(g32), format!("{bias}"));
    if elem == ScalarType::F32 {
        sess.asm.inst2("shl", reg_name(g32), format!("{mant_bits}"));
        sess.asm
            .inst2(&format!("{v}movd"), reg_name(scale), reg_name(g32));
    } else {
        sess.asm.inst2("movsxd", reg_name(g), reg_name(g32));
        sess.asm.inst2("shl", reg_name(g), format!("{mant_bits}"));
        sess.asm
            .inst2(&format!("{v}movq"), reg_name(scale), reg_name(g));
    }
    sess.regs.release(g)?;

    let mul = match elem {
        ScalarType::F32 => "mulss",
        _ => "mulsd",
    };
    let dst = if sess.regs.can_destruct(ap) {
        ap
    } else {
        sess.regs.acquire(RegClass::Xmm)?
    };
    if tier >= Tier::Avx2 {
        sess.asm.inst3(
            &format!("v{mul}"),
            reg_name(dst),
            reg_name(ap),
            reg_name(scale),
        );
    } else {
        if dst != ap {
            sess.asm
                .inst2("movaps", reg_name(dst), reg_name(ap));
        }
        sess.asm.inst2(mul, reg_name(dst), reg_name(scale));
    }
    sess.regs.release(scale)?;
    if sess.regs.can_destruct(ep) {
        sess.regs.release(ep)?;
    }
    Ok(Some(Operand::reg(ty, dst)))
}

/// Mantissa half of frexp: the input's exponent field is replaced with
/// `bias - 1`, putting the result in `[0.5, 1)`; a zero input forces a zero
/// result through cmov, since the bit trick alone would produce 0.5.
fn lower_frexp_mantissa(
    sess: &mut Session,
    _op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let v = vp(tier);
    let a = materialize(sess, &operands[0])?;
    let ap = a.regs()[0];

    let dst = sess.regs.acquire(RegClass::Xmm)?;
    if elem == ScalarType::F32 {
        let g = sess.regs.acquire(RegClass::Gp32)?;
        let h = sess.regs.acquire(RegClass::Gp32)?;
        sess.asm
            .inst2(&format!("{v}movd"), reg_name(g), reg_name(ap));
        sess.asm.inst2("mov", reg_name(h), reg_name(g));
        sess.asm.inst2("and", reg_name(g), "0x807fffff");
        sess.asm
            .inst2("or", reg_name(g), format!("0x{:08x}", ((BIAS32 - 1) as u32) << 23));
        // shl leaves ZF set exactly when the value (sign dropped) is zero.
        sess.asm.inst2("shl", reg_name(h), "1");
        sess.asm.inst2("cmovz", reg_name(g), reg_name(h));
        sess.asm
            .inst2(&format!("{v}movd"), reg_name(dst), reg_name(g));
        sess.regs.release(g)?;
        sess.regs.release(h)?;
    } else {
        let g = sess.regs.acquire(RegClass::Gp64)?;
        let h = sess.regs.acquire(RegClass::Gp64)?;
        let t = sess.regs.acquire(RegClass::Gp64)?;
        sess.asm
            .inst2(&format!("{v}movq"), reg_name(g), reg_name(ap));
        sess.asm.inst2("mov", reg_name(h), reg_name(g));
        sess.asm.inst2("mov", reg_name(t), "0x800fffffffffffff");
        sess.asm.inst2("and", reg_name(g), reg_name(t));
        sess.asm
            .inst2("mov", reg_name(t), format!("0x{:016x}", ((BIAS64 - 1) as u64) << 52));
        sess.asm.inst2("or", reg_name(g), reg_name(t));
        sess.asm.inst2("shl", reg_name(h), "1");
        sess.asm.inst2("cmovz", reg_name(g), reg_name(h));
        sess.asm
            .inst2(&format!("{v}movq"), reg_name(dst), reg_name(g));
        sess.regs.release(g)?;
        sess.regs.release(h)?;
        sess.regs.release(t)?;
    }
    if sess.regs.can_destruct(ap) {
        sess.regs.release(ap)?;
    }
    Ok(Some(Operand::reg(ty, dst)))
}

/// Exponent half of frexp: the unbiased exponent as an i32, zero for a
/// zero input.
fn lower_frexp_exponent(
    sess: &mut Session,
    _op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let v = vp(tier);
    let a = materialize(sess, &operands[0])?;
    let ap = a.regs()[0];

    let g = sess.regs.acquire(RegClass::Gp64)?;
    let h = sess.regs.acquire(RegClass::Gp64)?;
    let g32 = g.reclassed(RegClass::Gp32);
    let h32 = h.reclassed(RegClass::Gp32);
    if elem == ScalarType::F32 {
        sess.asm
            .inst2(&format!("{v}movd"), reg_name(g32), reg_name(ap));
        sess.asm.inst2("mov", reg_name(h32), reg_name(g32));
        sess.asm.inst2("shr", reg_name(g32), "23");
        sess.asm.inst2("and", reg_name(g32), "0xff");
        sess.asm
            .inst2("sub", reg_name(g32), format!("{}", BIAS32 - 1));
        sess.asm.inst2("shl", reg_name(h32), "1");
        sess.asm.inst2("cmovz", reg_name(g32), reg_name(h32));
    } else {
        sess.asm
            .inst2(&format!("{v}movq"), reg_name(g), reg_name(ap));
        sess.asm.inst2("mov", reg_name(h), reg_name(g));
        sess.asm.inst2("shr", reg_name(g), "52");
        sess.asm.inst2("and", reg_name(g32), "0x7ff");
        sess.asm
            .inst2("sub", reg_name(g32), format!("{}", BIAS64 - 1));
        sess.asm.inst2("shl", reg_name(h), "1");
        sess.asm.inst2("cmovz", reg_name(g32), reg_name(h32));
    }
    sess.regs.release(h)?;
    if sess.regs.can_destruct(ap) {
        sess.regs.release(ap)?;
    }
    Ok(Some(Operand::reg(
        ValueType::Scalar(ScalarType::I32),
        g.reclassed(RegClass::Gp32),
    )))
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
            _ => DataInit::U64s(vec![3; ty.lanes() as usize]),
        };
        let named = sess.define_value(name, ty, init).unwrap();
        sess.apply("load", &[named]).unwrap().result.unwrap()
    }

    #[test]
    fn trio_differs_only_in_control_immediate() {
        let ty = ValueType::vector(ScalarType::F32, 4);
        let mut texts = Vec::new();
        for op in ["round", "floor", "ceil"] {
            let mut sess = session(Tier::Sse42);
            let a = value(&mut sess, "a", ty);
            let emitted = sess.apply(op, &[a]).unwrap();
            texts.push(emitted.instructions.clone());
            sess.retire(&emitted.result.unwrap()).unwrap();
            assert_eq!(sess.live_registers(), 0);
        }
        // Identical shape, different trailing immediate.
        for lines in &texts {
            assert_eq!(lines.len(), texts[0].len());
        }
        let last =
            |lines: &Vec<String>| lines.last().unwrap().rsplit(", ").next().unwrap().to_string();
        assert_eq!(last(&texts[0]), "0");
        assert_eq!(last(&texts[1]), "1");
        assert_eq!(last(&texts[2]), "2");
    }

    #[test]
    fn zmm_rounding_uses_rndscale_with_same_control() {
        let ty = ValueType::vector(ScalarType::F64, 8);
        let mut sess = session(Tier::Avx512);
        let a = value(&mut sess, "a", ty);
        let emitted = sess.apply("floor", &[a]).unwrap();
        let line = emitted
            .instructions
            .iter()
            .find(|l| l.starts_with("vrndscalepd"))
            .unwrap();
        assert!(line.ends_with(", 1"), "{line}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn ldexp_builds_power_of_two_in_exponent_field() {
        let fty = ValueType::Scalar(ScalarType::F64);
        let ity = ValueType::Scalar(ScalarType::I32);
        let mut sess = session(Tier::Sse42);
        let x = value(&mut sess, "x", fty);
        let e = value(&mut sess, "e", ity);
        let emitted = sess.apply("ldexp", &[x, e]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("add"), "{text}");
        assert!(text.contains("1023"), "{text}");
        assert!(text.contains("shl"), "{text}");
        assert!(text.contains("52"), "{text}");
        assert!(text.contains("mulsd"), "{text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn frexp_zero_case_is_branchless() {
        let fty = ValueType::Scalar(ScalarType::F64);
        let mut sess = session(Tier::Sse42);
        let x = value(&mut sess, "x", fty);
        sess.regs.preserve(x.regs()[0]);
        let mant = sess.apply("frexp_mantissa", &[x.clone()]).unwrap();
        let text = mant.instructions.join("\n");
        assert!(text.contains("cmovz"), "{text}");
        assert!(text.contains("0x800fffffffffffff"), "{text}");
        let exp = sess.apply("frexp_exponent", &[x.clone()]).unwrap();
        let text = exp.instructions.join("\n");
        assert!(text.contains("cmovz"), "{text}");
        assert!(text.contains("1022"), "{text}");
        assert_eq!(
            exp.result.as_ref().unwrap().ty,
            ValueType::Scalar(ScalarType::I32)
        );
        // No jumps anywhere: the backend emits straight-line code only.
        assert!(!text.contains("jmp") && !text.contains("jz"), "{text}");
        sess.regs.unpreserve(x.regs()[0]);
        sess.retire(&x).unwrap();
        sess.retire(&mant.result.unwrap()).unwrap();
        sess.retire(&exp.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }
}
