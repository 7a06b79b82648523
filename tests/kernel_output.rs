//! End-to-end shape of a compiled kernel: ordered instruction text, a
//! data-section description with named values and initializers, and a
//! stack-frame layout. This is the entire surface the external assembler
//! and runtime consume.

use lanegen::core::{ConstValue, CpuCaps, Operand, ScalarType, Session, Tier, ValueType};
use lanegen::x64::DataInit;

#[test]
fn full_kernel_compiles_to_text() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sess = Session::new(CpuCaps::for_tier(Tier::Avx2));
    let f4 = ValueType::vector(ScalarType::F32, 4);

    // Named inputs and a stack temporary.
    let weights = sess
        .define_value("weights", f4, DataInit::F32s(vec![0.1, 0.2, 0.3, 0.4]))
        .unwrap();
    let bias = sess
        .define_value("bias", f4, DataInit::F32s(vec![1.0; 4]))
        .unwrap();
    let scratch = sess.define_stack_value("scratch", f4).unwrap();
    sess.define_array("samples", ScalarType::F32, 64).unwrap();

    // samples[3] splat-multiplied against the weights, plus bias, floored.
    let item = sess
        .array_load(
            "samples",
            &Operand::constant(ValueType::Scalar(ScalarType::I64), ConstValue::I64(3)),
        )
        .unwrap()
        .result
        .unwrap();
    sess.retire(&item).unwrap();
    let x = sess
        .apply("load", &[Operand::constant(f4, ConstValue::F32(2.0))])
        .unwrap()
        .result
        .unwrap();
    let scaled = sess.apply("mul", &[x, weights]).unwrap().result.unwrap();
    let biased = sess.apply("add", &[scaled, bias]).unwrap().result.unwrap();
    let floored = sess.apply("floor", &[biased]).unwrap().result.unwrap();
    sess.apply("store", &[floored, scratch]).unwrap();

    // One random draw so the generator words appear in the data section.
    let r = sess.rng_next(ValueType::Scalar(ScalarType::F64)).unwrap();
    sess.retire(&r.result.unwrap()).unwrap();

    assert_eq!(sess.live_registers(), 0);
    let stats = sess.stats();
    assert!(stats.ops_applied >= 5);
    assert!(stats.instructions_emitted > 0);

    let out = sess.finish();

    // Instruction stream: ordered, one operation per line, no labels or
    // control flow.
    assert!(!out.instructions.is_empty());
    assert!(out.instructions.iter().all(|l| !l.contains(':')));
    assert!(out.instructions.iter().any(|l| l.starts_with("vmulps")));
    assert!(out.instructions.iter().any(|l| l.starts_with("vroundps")));

    // Data section: named values with initializers, the array descriptor,
    // and the lazily created generator words.
    assert!(out.data_section.contains("weights:"));
    assert!(out.data_section.contains(".float"));
    assert!(out.data_section.contains("samples:"));
    assert!(out.data_section.contains("rng_state:"));
    assert!(out.data_section.contains("rng_inc:"));

    // Stack frame: the named slot with size and alignment.
    assert!(out.stack_frame.contains("scratch"));
    assert!(out.stack_frame.contains("size 16"));
}

#[test]
fn sessions_are_independent() {
    // Two kernels compiled back to back share nothing: no state persists
    // across compilations.
    let build = || {
        let mut sess = Session::new(CpuCaps::for_tier(Tier::Sse42));
        let ty = ValueType::Scalar(ScalarType::F64);
        let v = sess
            .define_value("v", ty, DataInit::F64s(vec![4.0]))
            .unwrap();
        let x = sess.apply("load", &[v]).unwrap().result.unwrap();
        let y = sess.apply("sqrt", &[x]).unwrap().result.unwrap();
        sess.retire(&y).unwrap();
        sess.finish()
    };
    let first = build();
    let second = build();
    assert_eq!(first.instructions, second.instructions);
    assert_eq!(first.data_section, second.data_section);
}
