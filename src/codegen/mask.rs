// This module implements the comparison, mask, and select subsystem.
// Comparisons produce Mask operands whose physical representation depends on
// the tier: a dedicated predicate register under AVX-512, a full vector
// register of all-ones/all-zeros lanes below. Masks combine bitwise only
// with masks of the same declared width and the same representation kind.
// select(a, b, mask) lowers to a hardware masked blend under AVX-512 and to
// the (a AND m) OR (b ANDN m) synthesis below; when the mask's element width
// differs from the value's, the mask is first reshaped into the value's
// lane geometry with the same sign-extension widening and low-dword
// narrowing the integer conversions use (all-ones and all-zeros lanes
// survive both exactly). That reshuffle is the classic silent-corruption
// spot, so every width pairing is pinned by tests.

//! Comparisons, mask combination, and select.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::{MaskRepr, Operand};
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType, VECTOR_LANES};
use crate::x64::reg_name;

use super::convert::{convert_narrow_qd, convert_widen};
use super::dispatch::{all_value_types, ArgPat, Gate, Registry, SCALARS};
use super::loadstore::{materialize, vp};

pub(crate) fn install(reg: &mut Registry) {
    for ty in all_value_types() {
        if ty.is_vector() {
            for op in ["gt", "eq"] {
                reg.register(
                    op,
                    vec![ArgPat::Exact(ty), ArgPat::Exact(ty)],
                    Gate::Compare,
                    lower_compare,
                );
            }
            // One select signature per mask element type at the value's
            // lane count: the four 32/64 width pairings and the matching
            // float/int tags.
            for mask_elem in SCALARS {
                let mask_ty = ValueType::mask(mask_elem, ty.lanes());
                reg.register(
                    "select",
                    vec![
                        ArgPat::Exact(ty),
                        ArgPat::Exact(ty),
                        ArgPat::Exact(mask_ty),
                    ],
                    Gate::None,
                    lower_select,
                );
            }
        }
    }
    for elem in SCALARS {
        for &lanes in VECTOR_LANES.iter() {
            let mask_ty = ValueType::mask(elem, lanes);
            for op in ["and", "or", "xor"] {
                reg.register(
                    op,
                    vec![ArgPat::Exact(mask_ty), ArgPat::Exact(mask_ty)],
                    Gate::Combine,
                    lower_mask_logic,
                );
            }
            reg.register(
                "not",
                vec![ArgPat::Exact(mask_ty)],
                Gate::None,
                lower_mask_not,
            );
        }
    }
}

/// Predicate-register width suffix for a mask's lane count.
fn k_suffix(lanes: u8) -> &'static str {
    if lanes > 8 {
        "w"
    } else {
        "b"
    }
}

fn lower_compare(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let mask_ty = ty.comparison_mask();
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;

    if tier == Tier::Avx512 {
        let out = lower_compare_kreg(sess, op, elem, mask_ty, &a, &b)?;
        sess.retire(&a)?;
        sess.retire(&b)?;
        return Ok(Some(out));
    }

    let gt = op == "gt";
    let vex = tier >= Tier::Avx2;
    let mut parts = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        let m = sess.regs.acquire(ap.class)?;
        let (mn, an, bn) = (reg_name(m), reg_name(ap), reg_name(bp));
        if elem.is_float() {
            let c = if elem == ScalarType::F32 { "cmpps" } else { "cmppd" };
            if vex {
                sess.asm
                    .inst4(&format!("v{c}"), &mn, &an, &bn, if gt { "14" } else { "0" });
            } else if gt {
                // No greater-than predicate in the legacy encoding: compute
                // b < a instead.
                let c = if elem == ScalarType::F32 { "cmpltps" } else { "cmpltpd" };
                sess.asm.inst2("movaps", &mn, &bn);
                sess.asm.inst2(c, &mn, &an);
            } else {
                let c = if elem == ScalarType::F32 { "cmpeqps" } else { "cmpeqpd" };
                sess.asm.inst2("movaps", &mn, &an);
                sess.asm.inst2(c, &mn, &bn);
            }
        } else {
            let base = match (gt, elem.byte_size()) {
                (true, 4) => "pcmpgtd",
                (true, _) => "pcmpgtq",
                (false, 4) => "pcmpeqd",
                (false, _) => "pcmpeqq",
            };
            if vex {
                sess.asm.inst3(&format!("v{base}"), &mn, &an, &bn);
            } else {
                sess.asm.inst2("movdqa", &mn, &an);
                sess.asm.inst2(base, &mn, &bn);
            }
        }
        parts.push(m);
    }
    sess.retire(&a)?;
    sess.retire(&b)?;
    Ok(Some(Operand::parts(mask_ty, parts)))
}

/// AVX-512 comparison into a predicate register. Multi-part sources
/// produce one predicate fragment per part, concatenated bytewise.
fn lower_compare_kreg(
    sess: &mut Session,
    op: &str,
    elem: ScalarType,
    mask_ty: ValueType,
    a: &Operand,
    b: &Operand,
) -> CodegenResult<Operand> {
    let imm = if op == "gt" { "14" } else { "0" };
    let mut fragments = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        let k = sess.regs.acquire(RegClass::Kmask)?;
        let (kn, an, bn) = (reg_name(k), reg_name(ap), reg_name(bp));
        if elem.is_float() {
            let c = if elem == ScalarType::F32 { "vcmpps" } else { "vcmppd" };
            sess.asm.inst4(c, &kn, &an, &bn, imm);
        } else {
            let base = match (op, elem.byte_size()) {
                ("gt", 4) => "vpcmpgtd",
                ("gt", _) => "vpcmpgtq",
                (_, 4) => "vpcmpeqd",
                (_, _) => "vpcmpeqq",
            };
            sess.asm.inst3(base, &kn, &an, &bn);
        }
        fragments.push(k);
    }
    // Fold fragments: each holds 8 lanes here (the only multi-part case at
    // this tier is 16 lanes of 8-byte elements in two parts).
    while fragments.len() > 1 {
        let lo = fragments.remove(0);
        let hi = fragments.remove(0);
        let merged = sess.regs.acquire(RegClass::Kmask)?;
        sess.asm
            .inst3("kunpckbw", reg_name(merged), reg_name(hi), reg_name(lo));
        sess.regs.release(lo)?;
        sess.regs.release(hi)?;
        fragments.insert(0, merged);
    }
    Ok(Operand::reg(mask_ty, fragments[0]))
}

/// Bitwise combination of two masks: same declared width, same physical
/// representation, checked before anything is emitted.
fn lower_mask_logic(
    sess: &mut Session,
    op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    if a.mask_repr() != b.mask_repr() {
        return Err(CodegenError::TypeMismatch {
            op: op.to_string(),
            found: format!("{} with mismatched mask representations", ty),
        });
    }

    if a.mask_repr() == Some(MaskRepr::Kreg) {
        let ka = a.regs()[0];
        let kb = b.regs()[0];
        let dst = sess.regs.acquire(RegClass::Kmask)?;
        let mn = format!("k{}{}", op, k_suffix(ty.lanes()));
        sess.asm
            .inst3(&mn, reg_name(dst), reg_name(ka), reg_name(kb));
        sess.retire(&a)?;
        sess.retire(&b)?;
        return Ok(Some(Operand::reg(ty, dst)));
    }

    let tier = sess.tier();
    let base = match op {
        "and" => "pand",
        "or" => "por",
        _ => "pxor",
    };
    let mut parts = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        if tier >= Tier::Avx2 {
            let dst = if sess.regs.can_destruct(ap) {
                ap
            } else {
                sess.regs.acquire(ap.class)?
            };
            sess.asm.inst3(
                &format!("v{base}"),
                reg_name(dst),
                reg_name(ap),
                reg_name(bp),
            );
            if bp != dst && sess.regs.can_destruct(bp) {
                sess.regs.release(bp)?;
            }
            parts.push(dst);
        } else {
            let dst = if sess.regs.can_destruct(ap) {
                ap
            } else {
                let fresh = sess.regs.acquire(ap.class)?;
                sess.asm.inst2("movdqa", reg_name(fresh), reg_name(ap));
                fresh
            };
            sess.asm.inst2(base, reg_name(dst), reg_name(bp));
            if bp != dst && sess.regs.can_destruct(bp) {
                sess.regs.release(bp)?;
            }
            parts.push(dst);
        }
    }
    Ok(Some(Operand::parts(ty, parts)))
}

/// Mask complement.
fn lower_mask_not(
    sess: &mut Session,
    _op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let a = materialize(sess, &operands[0])?;

    if a.mask_repr() == Some(MaskRepr::Kreg) {
        let ka = a.regs()[0];
        let dst = sess.regs.acquire(RegClass::Kmask)?;
        sess.asm.inst2(
            &format!("knot{}", k_suffix(ty.lanes())),
            reg_name(dst),
            reg_name(ka),
        );
        sess.retire(&a)?;
        return Ok(Some(Operand::reg(ty, dst)));
    }

    let tier = sess.tier();
    let mut parts = Vec::with_capacity(a.regs().len());
    for &ap in a.regs() {
        let ones = sess.regs.acquire(ap.class)?;
        let o = reg_name(ones);
        if tier >= Tier::Avx2 {
            sess.asm.inst3("vpcmpeqd", &o, &o, &o);
            let dst = if sess.regs.can_destruct(ap) {
                ap
            } else {
                sess.regs.acquire(ap.class)?
            };
            sess.asm
                .inst3("vpxor", reg_name(dst), reg_name(ap), &o);
            sess.regs.release(ones)?;
            parts.push(dst);
        } else {
            sess.asm.inst2("pcmpeqd", &o, &o);
            sess.asm.inst2("pxor", &o, reg_name(ap));
            if sess.regs.can_destruct(ap) {
                sess.regs.release(ap)?;
            }
            parts.push(ones);
        }
    }
    Ok(Some(Operand::parts(ty, parts)))
}

/// Reshape a mask's vector representation into the value's lane geometry.
/// All-ones and all-zeros lanes survive sign-extension widening and
/// low-dword narrowing exactly, so this reuses the integer conversion
/// lowerings.
fn reshape_mask(
    sess: &mut Session,
    mask: &Operand,
    value_ty: ValueType,
) -> CodegenResult<Operand> {
    let mask_elem = mask.ty.elem();
    let value_elem = value_ty.elem();
    if mask_elem.byte_size() == value_elem.byte_size() {
        return Ok(mask.clone());
    }
    let lanes = mask.ty.lanes();
    let as_int = ValueType::Vector {
        elem: if mask_elem.byte_size() == 4 {
            ScalarType::I32
        } else {
            ScalarType::I64
        },
        lanes,
    };
    let int_mask = Operand::parts(as_int, mask.regs().to_vec());
    let tier = sess.tier();
    let parts = if value_elem.byte_size() == 8 {
        let target = ValueType::Vector {
            elem: ScalarType::I64,
            lanes,
        };
        convert_widen(
            sess,
            &int_mask,
            target,
            &format!("{}pmovsxdq", vp(tier)),
            false,
        )?
    } else {
        let target = ValueType::Vector {
            elem: ScalarType::I32,
            lanes,
        };
        convert_narrow_qd(sess, &int_mask, target)?
    };
    // The reshaped copy is owned here; the original mask follows the usual
    // destructibility rules.
    sess.retire(mask)?;
    Ok(Operand::parts(
        ValueType::mask(value_elem, lanes),
        parts,
    ))
}

/// `select(a, b, mask)`: `a` where the mask lane is true, `b` otherwise.
fn lower_select(
    sess: &mut Session,
    _op: &str,
    operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let mask = materialize(sess, &operands[2])?;

    if mask.mask_repr() == Some(MaskRepr::Kreg) {
        let out = lower_select_kreg(sess, elem, ty, &a, &b, &mask)?;
        sess.retire(&a)?;
        sess.retire(&b)?;
        sess.retire(&mask)?;
        return Ok(Some(out));
    }

    // Vector-lane representation: adjust the mask's lane geometry first,
    // then recombine bitwise.
    let mask = reshape_mask(sess, &mask, ty)?;
    let (and_mn, andn_mn, or_mn, copy_mn) = if elem.is_float() {
        match elem {
            ScalarType::F32 => ("andps", "andnps", "orps", "movaps"),
            _ => ("andpd", "andnpd", "orpd", "movapd"),
        }
    } else {
        ("pand", "pandn", "por", "movdqa")
    };

    let mut parts = Vec::with_capacity(a.regs().len());
    for ((&ap, &bp), &mp) in a.regs().iter().zip(b.regs()).zip(mask.regs()) {
        if tier >= Tier::Avx2 {
            let keep = sess.regs.acquire(ap.class)?;
            let drop = sess.regs.acquire(ap.class)?;
            sess.asm.inst3(
                &format!("v{and_mn}"),
                reg_name(keep),
                reg_name(mp),
                reg_name(ap),
            );
            sess.asm.inst3(
                &format!("v{andn_mn}"),
                reg_name(drop),
                reg_name(mp),
                reg_name(bp),
            );
            sess.asm.inst3(
                &format!("v{or_mn}"),
                reg_name(keep),
                reg_name(keep),
                reg_name(drop),
            );
            sess.regs.release(drop)?;
            parts.push(keep);
        } else {
            let keep = sess.regs.acquire(ap.class)?;
            sess.asm.inst2(copy_mn, reg_name(keep), reg_name(mp));
            sess.asm.inst2(and_mn, reg_name(keep), reg_name(ap));
            // ANDN destroys its first operand: work on a destructible copy
            // of the mask part.
            let mdst = if sess.regs.can_destruct(mp) {
                mp
            } else {
                let fresh = sess.regs.acquire(ap.class)?;
                sess.asm.inst2(copy_mn, reg_name(fresh), reg_name(mp));
                fresh
            };
            sess.asm.inst2(andn_mn, reg_name(mdst), reg_name(bp));
            sess.asm.inst2(or_mn, reg_name(keep), reg_name(mdst));
            if sess.regs.can_destruct(mdst) {
                sess.regs.release(mdst)?;
            }
            parts.push(keep);
        }
    }
    sess.retire(&a)?;
    sess.retire(&b)?;
    if tier >= Tier::Avx2 {
        // Below Avx2 every destructible mask part was already consumed as
        // an ANDN destination.
        sess.retire(&mask)?;
    }
    Ok(Some(Operand::parts(ty, parts)))
}

/// AVX-512 select: one masked blend, with predicate fragments shifted down
/// for the upper parts of a decomposed value.
fn lower_select_kreg(
    sess: &mut Session,
    elem: ScalarType,
    ty: ValueType,
    a: &Operand,
    b: &Operand,
    mask: &Operand,
) -> CodegenResult<Operand> {
    let blend = match elem {
        ScalarType::F32 => "vblendmps",
        ScalarType::F64 => "vblendmpd",
        ScalarType::I32 => "vpblendmd",
        ScalarType::I64 => "vpblendmq",
    };
    let k = mask.regs()[0];
    let native = ty.native_lane_count(Tier::Avx512);
    let mut parts = Vec::with_capacity(a.regs().len());
    for (i, (&ap, &bp)) in a.regs().iter().zip(b.regs()).enumerate() {
        let dst = sess.regs.acquire(ap.class)?;
        let kpart = if i == 0 {
            k
        } else {
            let shifted = sess.regs.acquire(RegClass::Kmask)?;
            sess.asm.inst3(
                "kshiftrw",
                reg_name(shifted),
                reg_name(k),
                format!("{}", i as u32 * native as u32),
            );
            shifted
        };
        sess.asm.inst3(
            blend,
            format!("{} {{{}}}", reg_name(dst), reg_name(kpart)),
            reg_name(bp),
            reg_name(ap),
        );
        if i > 0 {
            sess.regs.release(kpart)?;
        }
        parts.push(dst);
    }
    Ok(Operand::parts(ty, parts))
}
