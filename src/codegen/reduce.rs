// This module implements the horizontal dot-product reduction. The lowering
// is a full-width lane multiply followed by a pairwise horizontal-add tree
// over 128-bit chunks, and the chunk order and tree shape are identical at
// every tier: wider registers are first split back into the same 128-bit
// chunks the baseline works with, so the floating-point additions happen in
// exactly the same order and the result is bit-identical across tiers. That
// deliberately leaves AVX-512's faster differently-ordered reductions on
// the table; reproducibility wins. Invalid top lanes (3-lane values, 2-lane
// f32) are zeroed before the tree so the undefined register lanes never
// reach an addition.

//! Dot product: multiply, then a pinned pairwise reduction tree.

use crate::core::error::CodegenResult;
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};
use crate::x64::reg_name;

use super::arith::{dst_for, release_input};
use super::dispatch::{all_value_types, ArgPat, Gate, Registry};
use super::loadstore::{materialize, vp};

pub(crate) fn install(reg: &mut Registry) {
    for ty in all_value_types() {
        if ty.is_vector() && ty.elem().is_float() {
            reg.register(
                "dot",
                vec![ArgPat::Exact(ty), ArgPat::Exact(ty)],
                Gate::Combine,
                lower_dot,
            );
        }
    }
}

fn lower_dot(sess: &mut Session, _op: &str, operands: &[Operand]) -> CodegenResult<Option<Operand>> {
    let ty = operands[0].ty;
    let elem = ty.elem();
    let tier = sess.tier();
    let three_op = tier >= Tier::Avx2;
    let mul = match elem {
        ScalarType::F32 => "mulps",
        _ => "mulpd",
    };

    // Full-width lane products, one per part.
    let a = materialize(sess, &operands[0])?;
    let b = materialize(sess, &operands[1])?;
    let mut products = Vec::with_capacity(a.regs().len());
    for (&ap, &bp) in a.regs().iter().zip(b.regs()) {
        let (dst, _reused) = dst_for(sess, elem, ap, !three_op)?;
        if three_op {
            sess.asm
                .inst3(&format!("v{mul}"), reg_name(dst), reg_name(ap), reg_name(bp));
        } else {
            sess.asm.inst2(mul, reg_name(dst), reg_name(bp));
        }
        release_input(sess, ap, dst)?;
        release_input(sess, bp, dst)?;
        products.push(dst);
    }

    // Split every product back into 128-bit chunks, in lane order. The
    // chunk sequence is what pins the reduction order across tiers.
    let mut chunks: Vec<PhysReg> = Vec::new();
    for part in products {
        match part.class {
            RegClass::Zmm => {
                let extract = if elem == ScalarType::F32 {
                    "vextractf32x4"
                } else {
                    "vextractf64x2"
                };
                chunks.push(part.reclassed(RegClass::Xmm));
                for piece in 1..4 {
                    let t = sess.regs.acquire(RegClass::Xmm)?;
                    sess.asm.inst3(
                        extract,
                        reg_name(t),
                        reg_name(part),
                        format!("{piece}"),
                    );
                    chunks.push(t);
                }
            }
            RegClass::Ymm => {
                chunks.push(part.reclassed(RegClass::Xmm));
                let t = sess.regs.acquire(RegClass::Xmm)?;
                sess.asm
                    .inst3("vextractf128", reg_name(t), reg_name(part), "1");
                chunks.push(t);
            }
            _ => chunks.push(part),
        }
    }

    // Zero the undefined top lanes of the final chunk before they can feed
    // an addition.
    let chunk_lanes = if elem == ScalarType::F32 { 4 } else { 2 };
    let tail = ty.lanes() as u32 % chunk_lanes;
    if tail != 0 {
        let last = *chunks.last().expect("at least one chunk");
        let l = reg_name(last);
        match (elem, tail) {
            (ScalarType::F32, 3) => {
                if three_op {
                    sess.asm.inst4("vinsertps", &l, &l, &l, "0x08");
                } else {
                    sess.asm.inst3("insertps", &l, &l, "0x08");
                }
            }
            // A low-quadword move clears everything above lane 1 (f32) or
            // lane 0 (f64).
            _ => {
                sess.asm
                    .inst2(&format!("{}movq", vp(tier)), &l, &l);
            }
        }
    }

    // Pairwise horizontal-add tree, always in chunk order.
    let hadd = match elem {
        ScalarType::F32 => "haddps",
        _ => "haddpd",
    };
    while chunks.len() > 1 {
        let mut next = Vec::with_capacity(chunks.len().div_ceil(2));
        let mut iter = chunks.into_iter();
        while let Some(lhs) = iter.next() {
            if let Some(rhs) = iter.next() {
                if three_op {
                    sess.asm.inst3(
                        &format!("v{hadd}"),
                        reg_name(lhs),
                        reg_name(lhs),
                        reg_name(rhs),
                    );
                } else {
                    sess.asm.inst2(hadd, reg_name(lhs), reg_name(rhs));
                }
                sess.regs.release(rhs)?;
            }
            next.push(lhs);
        }
        chunks = next;
    }
    let acc = chunks[0];
    let steps = if elem == ScalarType::F32 { 2 } else { 1 };
    for _ in 0..steps {
        if three_op {
            sess.asm.inst3(
                &format!("v{hadd}"),
                reg_name(acc),
                reg_name(acc),
                reg_name(acc),
            );
        } else {
            sess.asm.inst2(hadd, reg_name(acc), reg_name(acc));
        }
    }

    Ok(Some(Operand::reg(ValueType::Scalar(elem), acc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CodegenError;
    use crate::core::isa::CpuCaps;
    use crate::x64::DataInit;

    fn session(tier: Tier) -> Session {
        Session::new(CpuCaps::for_tier(tier))
    }

    fn value(sess: &mut Session, name: &str, ty: ValueType) -> Operand {
        let init = match ty.elem() {
            ScalarType::F32 => DataInit::F32s(vec![0.5; ty.lanes() as usize]),
            _ => DataInit::F64s(vec![0.5; ty.lanes() as usize]),
        };
        let named = sess.define_value(name, ty, init).unwrap();
        sess.apply("load", &[named]).unwrap().result.unwrap()
    }

    fn dot_tail(sess: &mut Session, ty: ValueType) -> Vec<String> {
        let a = value(sess, "a", ty);
        let b = value(sess, "b", ty);
        let emitted = sess.apply("dot", &[a, b]).unwrap();
        let result = emitted.result.unwrap();
        assert_eq!(result.ty, ValueType::Scalar(ty.elem()));
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0);
        emitted
            .instructions
            .iter()
            .filter(|l| l.contains("hadd"))
            .cloned()
            .collect()
    }

    #[test]
    fn reduction_tree_has_same_depth_at_every_tier() {
        let ty = ValueType::vector(ScalarType::F32, 16);
        // 16 f32 lanes = 4 chunks: 3 pair-merges + 2 final folds = 5 hadds,
        // no matter which tier multiplied.
        for tier in Tier::ALL {
            let mut sess = session(tier);
            let hadds = dot_tail(&mut sess, ty);
            assert_eq!(hadds.len(), 5, "tier {}", tier.name());
        }
    }

    #[test]
    fn wider_tiers_split_back_to_chunks() {
        let ty = ValueType::vector(ScalarType::F32, 16);
        let mut sess = session(Tier::Avx512);
        let a = value(&mut sess, "a", ty);
        let b = value(&mut sess, "b", ty);
        let emitted = sess.apply("dot", &[a, b]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("vmulps zmm"), "{text}");
        assert!(text.contains("vextractf32x4"), "{text}");
        assert!(text.contains("vhaddps xmm"), "{text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn three_lane_zeroes_the_dead_lane() {
        let ty = ValueType::vector(ScalarType::F32, 3);
        let mut sess = session(Tier::Sse42);
        let a = value(&mut sess, "a", ty);
        let b = value(&mut sess, "b", ty);
        let emitted = sess.apply("dot", &[a, b]).unwrap();
        let text = emitted.instructions.join("\n");
        assert!(text.contains("insertps") && text.contains("0x08"), "{text}");
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    #[test]
    fn f64_pair_uses_single_fold() {
        let ty = ValueType::vector(ScalarType::F64, 2);
        let mut sess = session(Tier::Avx2);
        let hadds = dot_tail(&mut sess, ty);
        assert_eq!(hadds, vec!["vhaddpd xmm0, xmm0, xmm0".to_string()]);
    }

    #[test]
    fn int_dot_rejected() {
        let ty = ValueType::vector(ScalarType::I32, 4);
        let mut sess = session(Tier::Sse42);
        let a = value_int(&mut sess, "a", ty);
        let b = value_int(&mut sess, "b", ty);
        let err = sess.apply("dot", &[a.clone(), b.clone()]).unwrap_err();
        assert!(matches!(err, CodegenError::NoMatchingOverload { .. }));
        sess.retire(&a).unwrap();
        sess.retire(&b).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }

    fn value_int(sess: &mut Session, name: &str, ty: ValueType) -> Operand {
        let named = sess
            .define_value(name, ty, DataInit::U32s(vec![1; ty.lanes() as usize]))
            .unwrap();
        sess.apply("load", &[named]).unwrap().result.unwrap()
    }
}
