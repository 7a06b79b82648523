//! Cross-tier sweep: every operator lowered under every tier must produce
//! a result of the same declared type with the tier's decomposition count,
//! and must leave the allocator clean. The numeric contract (bit-identical
//! results per lane) is carried by the lowering choices these tests pin:
//! the same instruction semantics per lane at every tier, and the pinned
//! dot-product reduction order.

use lanegen::core::{ConstValue, CpuCaps, Operand, ScalarType, Session, Tier, ValueType};
use lanegen::x64::DataInit;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session(tier: Tier) -> Session {
    Session::new(CpuCaps::for_tier(tier))
}

fn load_value(sess: &mut Session, name: &str, ty: ValueType) -> Operand {
    let lanes = ty.lanes() as usize;
    let init = match ty.elem() {
        ScalarType::F32 => DataInit::F32s((0..lanes).map(|i| i as f32 + 0.5).collect()),
        ScalarType::F64 => DataInit::F64s((0..lanes).map(|i| i as f64 + 0.5).collect()),
        ScalarType::I32 => DataInit::U32s((0..lanes).map(|i| i as u32 + 1).collect()),
        ScalarType::I64 => DataInit::U64s((0..lanes).map(|i| i as u64 + 1).collect()),
    };
    let named = sess.define_value(name, ty, init).unwrap();
    sess.apply("load", &[named]).unwrap().result.unwrap()
}

/// Run one binary operator at every tier; check shape and hygiene.
fn sweep_binary(op: &str, ty: ValueType) {
    init_logging();
    let mut result_ty = None;
    for tier in Tier::ALL {
        let mut sess = session(tier);
        let a = load_value(&mut sess, "a", ty);
        let b = load_value(&mut sess, "b", ty);
        let emitted = sess
            .apply(op, &[a, b])
            .unwrap_or_else(|e| panic!("{op} on {ty} at {}: {e}", tier.name()));
        let result = emitted.result.expect("binary op returns a value");
        // Same declared result type at every tier.
        match result_ty {
            None => result_ty = Some(result.ty),
            Some(expect) => assert_eq!(result.ty, expect, "{op} on {ty} at {}", tier.name()),
        }
        // Tier-correct decomposition of the result.
        assert_eq!(
            result.regs().len(),
            result.ty.part_count(tier) as usize,
            "{op} on {ty} at {}",
            tier.name()
        );
        sess.retire(&result).unwrap();
        assert_eq!(
            sess.live_registers(),
            0,
            "register leak: {op} on {ty} at {}",
            tier.name()
        );
        let (acquired, released) = sess.register_counters();
        assert_eq!(acquired, released, "{op} on {ty} at {}", tier.name());
    }
}

fn sweep_unary(op: &str, ty: ValueType) {
    init_logging();
    for tier in Tier::ALL {
        let mut sess = session(tier);
        let a = load_value(&mut sess, "a", ty);
        let emitted = sess
            .apply(op, &[a])
            .unwrap_or_else(|e| panic!("{op} on {ty} at {}: {e}", tier.name()));
        let result = emitted.result.expect("unary op returns a value");
        assert_eq!(
            result.regs().len(),
            result.ty.part_count(tier) as usize,
            "{op} on {ty} at {}",
            tier.name()
        );
        sess.retire(&result).unwrap();
        assert_eq!(sess.live_registers(), 0, "{op} on {ty} at {}", tier.name());
    }
}

#[test]
fn arithmetic_across_tiers() {
    for lanes in [2u8, 3, 4, 8, 16] {
        sweep_binary("add", ValueType::vector(ScalarType::F32, lanes));
        sweep_binary("mul", ValueType::vector(ScalarType::F64, lanes));
        sweep_binary("sub", ValueType::vector(ScalarType::I32, lanes));
        sweep_binary("add", ValueType::vector(ScalarType::I64, lanes));
    }
    sweep_binary("add", ValueType::Scalar(ScalarType::I32));
    sweep_binary("div", ValueType::Scalar(ScalarType::I64));
    sweep_binary("div", ValueType::vector(ScalarType::F32, 8));
    sweep_binary("min", ValueType::vector(ScalarType::I64, 4));
    sweep_binary("max", ValueType::vector(ScalarType::F64, 16));
    sweep_binary("and", ValueType::vector(ScalarType::I32, 8));
}

#[test]
fn unary_across_tiers() {
    for lanes in [2u8, 3, 4, 8, 16] {
        sweep_unary("abs", ValueType::vector(ScalarType::F32, lanes));
        sweep_unary("neg", ValueType::vector(ScalarType::I64, lanes));
        sweep_unary("sqrt", ValueType::vector(ScalarType::F64, lanes));
    }
    sweep_unary("abs", ValueType::Scalar(ScalarType::I64));
    sweep_unary("round", ValueType::vector(ScalarType::F32, 8));
    sweep_unary("floor", ValueType::vector(ScalarType::F64, 4));
    sweep_unary("ceil", ValueType::Scalar(ScalarType::F32));
}

#[test]
fn conversions_across_tiers() {
    sweep_unary("to_f32", ValueType::vector(ScalarType::I32, 8));
    sweep_unary("to_i32", ValueType::vector(ScalarType::F32, 16));
    sweep_unary("to_f64", ValueType::vector(ScalarType::F32, 4));
    sweep_unary("to_f32", ValueType::vector(ScalarType::F64, 8));
    sweep_unary("to_i64", ValueType::vector(ScalarType::I32, 4));
    sweep_unary("to_i32", ValueType::vector(ScalarType::I64, 8));
    sweep_unary("to_f64", ValueType::vector(ScalarType::I64, 2));
    sweep_unary("to_i64", ValueType::vector(ScalarType::F64, 4));
    sweep_unary("to_f64", ValueType::vector(ScalarType::F32, 3));
}

#[test]
fn dot_product_across_tiers() {
    sweep_binary("dot", ValueType::vector(ScalarType::F32, 4));
    sweep_binary("dot", ValueType::vector(ScalarType::F32, 16));
    sweep_binary("dot", ValueType::vector(ScalarType::F64, 8));
    sweep_binary("dot", ValueType::vector(ScalarType::F32, 3));
}

#[test]
fn shifts_across_tiers() {
    init_logging();
    for tier in Tier::ALL {
        for ty in [
            ValueType::Scalar(ScalarType::I32),
            ValueType::Scalar(ScalarType::I64),
            ValueType::vector(ScalarType::I32, 4),
            ValueType::vector(ScalarType::I64, 8),
        ] {
            for op in ["shl", "shr", "sar"] {
                let mut sess = session(tier);
                let a = load_value(&mut sess, "a", ty);
                let c = Operand::constant(
                    ValueType::Scalar(ScalarType::I32),
                    ConstValue::I32(5),
                );
                let emitted = sess.apply(op, &[a, c]).unwrap();
                sess.retire(&emitted.result.unwrap()).unwrap();
                assert_eq!(sess.live_registers(), 0, "{op} {ty} at {}", tier.name());
            }
        }
    }
}

#[test]
fn compare_select_across_tiers() {
    init_logging();
    for tier in Tier::ALL {
        for elem in [ScalarType::F32, ScalarType::F64, ScalarType::I32, ScalarType::I64] {
            let ty = ValueType::vector(elem, 4);
            let mut sess = session(tier);
            let a = load_value(&mut sess, "a", ty);
            let b = load_value(&mut sess, "b", ty);
            let mask = sess.apply("gt", &[a, b]).unwrap().result.unwrap();
            assert_eq!(mask.ty, ty.comparison_mask());
            let x = load_value(&mut sess, "x", ty);
            let y = load_value(&mut sess, "y", ty);
            let selected = sess
                .apply("select", &[x, y, mask])
                .unwrap()
                .result
                .unwrap();
            assert_eq!(selected.ty, ty);
            sess.retire(&selected).unwrap();
            assert_eq!(
                sess.live_registers(),
                0,
                "select {} at {}",
                ty,
                tier.name()
            );
        }
    }
}

#[test]
fn fused_named_operand_across_tiers() {
    init_logging();
    for tier in Tier::ALL {
        let ty = ValueType::vector(ScalarType::F32, 8);
        let mut sess = session(tier);
        let a = load_value(&mut sess, "a", ty);
        let b = sess
            .define_value("b", ty, DataInit::F32s(vec![2.0; 8]))
            .unwrap();
        let emitted = sess.apply("mul", &[a, b]).unwrap();
        // The named operand is folded into the multiply, not loaded.
        assert!(
            emitted.instructions.iter().any(|l| l.contains("[b")),
            "at {}: {:?}",
            tier.name(),
            emitted.instructions
        );
        sess.retire(&emitted.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }
}
