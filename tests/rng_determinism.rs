//! Determinism properties of the generator: fixed golden sequence, tier
//! independence of the emitted recurrence, and the scalar-packing contract
//! for vector randoms.

use lanegen::core::{CpuCaps, ScalarType, Session, Tier, ValueType};
use lanegen::RngModel;

#[test]
fn golden_three_value_sequence_for_seed_42() {
    let mut model = RngModel::from_seed(42);
    assert_eq!(model.next_f64().to_bits(), 0x3fbd5ddcb9000000);
    assert_eq!(model.next_f64().to_bits(), 0x3fdc9b0469000000);
    assert_eq!(model.next_f64().to_bits(), 0x3fea89f6d8000000);
}

#[test]
fn same_seed_same_sequence_across_runs() {
    let collect = || {
        let mut m = RngModel::from_seed(987654321);
        (0..64).map(|_| m.next_u32()).collect::<Vec<_>>()
    };
    assert_eq!(collect(), collect());
}

#[test]
fn seeded_initializers_identical_across_tiers() {
    // The data-section words the kernel starts from are a pure function of
    // the seed, never of the tier.
    let mut words = None;
    for tier in Tier::ALL {
        let mut sess = Session::new(CpuCaps::for_tier(tier));
        sess.rng_seed(42).unwrap();
        let state = sess.rng_next(ValueType::Scalar(ScalarType::F64)).unwrap();
        let entry_state = format!("{:?}", sessdata_init(&sess, "rng_state"));
        let entry_inc = format!("{:?}", sessdata_init(&sess, "rng_inc"));
        match &words {
            None => words = Some((entry_state, entry_inc)),
            Some((s, i)) => {
                assert_eq!(*s, entry_state, "tier {}", tier.name());
                assert_eq!(*i, entry_inc, "tier {}", tier.name());
            }
        }
        sess.retire(&state.result.unwrap()).unwrap();
        assert_eq!(sess.live_registers(), 0);
    }
}

fn sessdata_init(sess: &Session, name: &str) -> String {
    // The rendered data section is the public view of the initializers.
    let rendered = sess.data_section_text();
    rendered
        .lines()
        .skip_while(|l| !l.starts_with(&format!("{name}:")))
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

#[test]
fn recurrence_instructions_identical_across_tiers() {
    // The advance runs in general-purpose registers; the emitted step
    // sequence is tier-invariant for integer scalars.
    let emit = |tier: Tier| {
        let mut sess = Session::new(CpuCaps::for_tier(tier));
        sess.rng_seed(7).unwrap();
        sess.rng_next(ValueType::Scalar(ScalarType::I32))
            .unwrap()
            .instructions
    };
    let base = emit(Tier::Sse42);
    assert_eq!(base, emit(Tier::Avx2));
    assert_eq!(base, emit(Tier::Avx512));
}

#[test]
fn float_values_land_in_unit_interval() {
    let mut model = RngModel::from_seed(2026);
    for _ in 0..4096 {
        let x = model.next_f64();
        assert!((0.0..1.0).contains(&x));
    }
}

#[test]
fn vector_random_is_sequential_scalar_packing() {
    // The model predicts vector lanes as consecutive scalar draws; the
    // emitted code advances the state once per lane in lane order.
    let mut model = RngModel::from_seed(11);
    let lane_values: Vec<f32> = (0..4).map(|_| model.next_f32()).collect();
    let mut again = RngModel::from_seed(11);
    for value in lane_values {
        assert_eq!(value.to_bits(), again.next_f32().to_bits());
    }

    let mut sess = Session::new(CpuCaps::for_tier(Tier::Sse42));
    sess.rng_seed(11).unwrap();
    let emitted = sess
        .rng_next(ValueType::vector(ScalarType::F32, 4))
        .unwrap();
    let advances = emitted
        .instructions
        .iter()
        .filter(|l| l.starts_with("mov [rng_state]"))
        .count();
    assert_eq!(advances, 4);
    // Lane inserts appear in order 0..4.
    let lanes: Vec<&String> = emitted
        .instructions
        .iter()
        .filter(|l| l.starts_with("pinsrd"))
        .collect();
    for (i, line) in lanes.iter().enumerate() {
        assert!(line.ends_with(&format!(", {i}")), "{line}");
    }
    sess.retire(&emitted.result.unwrap()).unwrap();
    assert_eq!(sess.live_registers(), 0);
}
