// This module implements the deterministic pseudo-random generator. The
// recurrence is a PCG-style multiply-add state advance over a pair of
// 64-bit data-section words with an xorshift-rotate output derived from the
// pre-advance state. The words live in the emitted kernel's data section
// and are read and advanced by the generated code at execution time;
// seeding happens at code-generation time by computing the seeded words
// with the host-side RngModel and writing them as initializers. RngModel is
// also the executable oracle for tests: it predicts exactly the sequence
// the emitted instructions produce. Floats are built by filling the
// mantissa of a [1, 2) value with the raw 32 bits and subtracting the bias,
// landing in [0, 1). Vector randoms issue the scalar step once per lane and
// pack the results; no wider generator step exists, so the recurrence's
// statistical behavior is independent of the requested width. Concurrent
// advancement of the words by parallel workers is not synchronized; that is
// a documented limitation of the execution model, not a guarantee.

//! Deterministic RNG: host model, seeded initializers, emitted recurrence.

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::isa::Tier;
use crate::core::operand::Operand;
use crate::core::regalloc::{PhysReg, RegClass};
use crate::core::session::{Emitted, Session};
use crate::core::types::{ScalarType, ValueType};
use crate::x64::{data_ref, reg_name, reg_name_8, DataEntry, DataInit};

use super::dispatch::{Gate, Registry};
use super::loadstore::vp;

const STATE_SYMBOL: &str = "rng_state";
const INC_SYMBOL: &str = "rng_inc";
const WORKER_SYMBOL: &str = "worker_index";

/// Exponent bits of 1.0 in each float width; doubles as the OR mask that
/// anchors the packed random bits in [1, 2).
const ONE_F64_BITS: u64 = 0x3FF0_0000_0000_0000;
const ONE_F32_BITS: u32 = 0x3F80_0000;

pub(crate) fn install(reg: &mut Registry) {
    reg.register("worker_index", vec![], Gate::None, lower_worker_index);
}

/// Host-side model of the emitted recurrence. Computes seeded data-section
/// initializers and serves as the oracle for the determinism tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RngModel {
    state: u64,
    inc: u64,
}

impl RngModel {
    pub const MULTIPLIER: u64 = 6364136223846793005;
    /// Fixed stream constant: seeding is deterministic from one scalar.
    const STREAM: u64 = 0x14057B7EF767814F;

    /// Reset from a single scalar in a fixed deterministic way.
    pub fn from_seed(seed: u64) -> Self {
        let mut model = Self {
            state: 0,
            inc: (Self::STREAM << 1) | 1,
        };
        model.next_u32();
        model.state = model.state.wrapping_add(seed);
        model.next_u32();
        model
    }

    /// One step of the recurrence: multiply-add advance, xorshift-rotate
    /// output from the pre-advance state.
    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(Self::MULTIPLIER).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform in [0, 1): raw bits into the mantissa of [1, 2), minus 1.
    pub fn next_f64(&mut self) -> f64 {
        let bits = ONE_F64_BITS | ((self.next_u32() as u64) << 20);
        f64::from_bits(bits) - 1.0
    }

    pub fn next_f32(&mut self) -> f32 {
        let bits = ONE_F32_BITS | (self.next_u32() >> 9);
        f32::from_bits(bits) - 1.0
    }

    pub fn words(&self) -> (u64, u64) {
        (self.state, self.inc)
    }
}

/// Session-held RNG state: the model that produced the data-section
/// initializers. One instance per kernel unit, created lazily.
#[derive(Debug)]
pub struct RngSlots {
    pub model: RngModel,
}

impl Session {
    /// Seed the kernel's generator. Computes the seeded state pair on the
    /// host and writes it as the data-section initializer; emits nothing.
    /// Must precede the first random-value request.
    pub fn rng_seed(&mut self, seed: u64) -> CodegenResult<()> {
        if self.rng.is_some() {
            return Err(CodegenError::InvariantViolation {
                reason: "generator reseeded after first use".to_string(),
            });
        }
        let model = RngModel::from_seed(seed);
        self.define_rng_words(&model)?;
        self.rng = Some(RngSlots { model });
        Ok(())
    }

    fn define_rng_words(&mut self, model: &RngModel) -> CodegenResult<()> {
        let (state, inc) = model.words();
        self.data.define(DataEntry {
            name: STATE_SYMBOL.to_string(),
            ty: None,
            byte_size: 8,
            align: 8,
            init: DataInit::U64s(vec![state]),
        })?;
        self.data.define(DataEntry {
            name: INC_SYMBOL.to_string(),
            ty: None,
            byte_size: 8,
            align: 8,
            init: DataInit::U64s(vec![inc]),
        })?;
        Ok(())
    }

    /// Emit one pseudo-random value of the requested type. Scalars advance
    /// the generator once; vectors advance it once per lane and pack.
    pub fn rng_next(&mut self, ty: ValueType) -> CodegenResult<Emitted> {
        if ty.is_mask() {
            return Err(CodegenError::UnsupportedOperation {
                op: "rng_next".to_string(),
                ty: ty.to_string(),
            });
        }
        if self.rng.is_none() {
            // Lazy creation on first use, with the fixed default seed.
            let model = RngModel::from_seed(0);
            self.define_rng_words(&model)?;
            self.rng = Some(RngSlots { model });
        }
        let mark = self.asm.len();
        let result = emit_random(self, ty)?;
        let instructions = self.asm.since(mark).to_vec();
        Ok(Emitted {
            instructions,
            result: Some(result),
        })
    }
}

/// Claim rcx for the rotate counts, saving a foreign value if present.
/// Returns (saved copy, claimed handle).
fn claim_rcx(sess: &mut Session) -> CodegenResult<(Option<PhysReg>, Option<PhysReg>)> {
    const RCX: u8 = 1;
    if sess.regs.is_free(RegClass::Gp64, RCX) {
        Ok((None, Some(sess.regs.acquire_named(RegClass::Gp64, RCX)?)))
    } else {
        let save = sess.regs.acquire(RegClass::Gp64)?;
        sess.asm.inst2(
            "mov",
            reg_name(save),
            reg_name(PhysReg::new(RegClass::Gp64, RCX)),
        );
        Ok((Some(save), None))
    }
}

fn restore_rcx(
    sess: &mut Session,
    saved: Option<PhysReg>,
    claimed: Option<PhysReg>,
) -> CodegenResult<()> {
    const RCX: u8 = 1;
    if let Some(save) = saved {
        sess.asm.inst2(
            "mov",
            reg_name(PhysReg::new(RegClass::Gp64, RCX)),
            reg_name(save),
        );
        sess.regs.release(save)?;
    }
    if let Some(claim) = claimed {
        sess.regs.release(claim)?;
    }
    Ok(())
}

/// Emit one generator step: advance the data-section words, leave the
/// 32-bit output in a fresh general-purpose register. The rotate count
/// passes through cl, which the caller has already claimed.
fn emit_rng_step(sess: &mut Session) -> CodegenResult<PhysReg> {
    let old = sess.regs.acquire(RegClass::Gp64)?;
    let new = sess.regs.acquire(RegClass::Gp64)?;
    let out = sess.regs.acquire(RegClass::Gp64)?;
    let rcx = PhysReg::new(RegClass::Gp64, 1);
    let (o, n, u) = (reg_name(old), reg_name(new), reg_name(out));

    sess.asm.inst2("mov", &o, data_ref(STATE_SYMBOL));
    sess.asm
        .inst2("mov", &n, format!("0x{:016x}", RngModel::MULTIPLIER));
    sess.asm.inst2("imul", &n, &o);
    sess.asm.inst2("add", &n, data_ref(INC_SYMBOL));
    sess.asm.inst2("mov", data_ref(STATE_SYMBOL), &n);

    // Output: xorshift of the pre-advance state, rotated by its top bits.
    sess.asm.inst2("mov", &u, &o);
    sess.asm.inst2("shr", &u, "18");
    sess.asm.inst2("xor", &u, &o);
    sess.asm.inst2("shr", &u, "27");
    sess.asm.inst2("shr", &o, "59");
    sess.asm.inst2(
        "mov",
        reg_name(rcx.reclassed(RegClass::Gp32)),
        reg_name(old.reclassed(RegClass::Gp32)),
    );
    sess.asm.inst2(
        "ror",
        reg_name(out.reclassed(RegClass::Gp32)),
        reg_name_8(rcx),
    );

    sess.regs.release(old)?;
    sess.regs.release(new)?;
    Ok(out)
}

/// Turn the 32 raw bits in `raw` into the requested scalar's bit pattern,
/// still in a general-purpose register.
fn emit_bits_for(sess: &mut Session, elem: ScalarType, raw: PhysReg) -> CodegenResult<()> {
    let r32 = reg_name(raw.reclassed(RegClass::Gp32));
    let r64 = reg_name(raw);
    match elem {
        ScalarType::I32 | ScalarType::I64 => {}
        ScalarType::F32 => {
            sess.asm.inst2("shr", &r32, "9");
            sess.asm
                .inst2("or", &r32, format!("0x{ONE_F32_BITS:08x}"));
        }
        ScalarType::F64 => {
            let t = sess.regs.acquire(RegClass::Gp64)?;
            sess.asm.inst2("shl", &r64, "20");
            sess.asm
                .inst2("mov", reg_name(t), format!("0x{ONE_F64_BITS:016x}"));
            sess.asm.inst2("or", &r64, reg_name(t));
            sess.regs.release(t)?;
        }
    }
    Ok(())
}

/// Subtract the 1.0 bias from every float lane of a packed register.
fn emit_bias_subtract(sess: &mut Session, elem: ScalarType, part: PhysReg) -> CodegenResult<()> {
    let tier = sess.tier();
    let bits = match elem {
        ScalarType::F32 => ONE_F32_BITS as u64,
        _ => ONE_F64_BITS,
    };
    let one = super::arith::materialize_lane_mask(sess, elem, part.class, bits)?;
    let base = if elem == ScalarType::F32 { "subps" } else { "subpd" };
    if tier >= Tier::Avx2 {
        sess.asm.inst3(
            &format!("v{base}"),
            reg_name(part),
            reg_name(part),
            reg_name(one),
        );
    } else {
        sess.asm.inst2(base, reg_name(part), reg_name(one));
    }
    sess.regs.release(one)?;
    Ok(())
}

fn emit_random(sess: &mut Session, ty: ValueType) -> CodegenResult<Operand> {
    let tier = sess.tier();
    let v = vp(tier);
    let (saved, claimed) = claim_rcx(sess)?;

    let result = match ty {
        ValueType::Scalar(elem) => {
            let raw = emit_rng_step(sess)?;
            emit_bits_for(sess, elem, raw)?;
            match elem {
                ScalarType::I32 => Ok(Operand::reg(ty, raw.reclassed(RegClass::Gp32))),
                ScalarType::I64 => {
                    // Zero-extend the raw 32 bits.
                    let r32 = reg_name(raw.reclassed(RegClass::Gp32));
                    sess.asm.inst2("mov", &r32, &r32);
                    Ok(Operand::reg(ty, raw))
                }
                ScalarType::F32 => {
                    let dst = sess.regs.acquire(RegClass::Xmm)?;
                    sess.asm.inst2(
                        &format!("{v}movd"),
                        reg_name(dst),
                        reg_name(raw.reclassed(RegClass::Gp32)),
                    );
                    sess.regs.release(raw)?;
                    emit_scalar_bias(sess, elem, dst)?;
                    Ok(Operand::reg(ty, dst))
                }
                ScalarType::F64 => {
                    let dst = sess.regs.acquire(RegClass::Xmm)?;
                    sess.asm
                        .inst2(&format!("{v}movq"), reg_name(dst), reg_name(raw));
                    sess.regs.release(raw)?;
                    emit_scalar_bias(sess, elem, dst)?;
                    Ok(Operand::reg(ty, dst))
                }
            }
        }
        ValueType::Vector { elem, lanes } => emit_random_vector(sess, ty, elem, lanes),
        ValueType::Mask { .. } => unreachable!("masks rejected before emission"),
    };
    let result = result?;
    restore_rcx(sess, saved, claimed)?;
    Ok(result)
}

/// Scalar float bias subtraction: `value - 1.0` in the low lane.
fn emit_scalar_bias(sess: &mut Session, elem: ScalarType, dst: PhysReg) -> CodegenResult<()> {
    let tier = sess.tier();
    let v = vp(tier);
    let one = sess.regs.acquire(RegClass::Xmm)?;
    let g = sess.regs.acquire(RegClass::Gp64)?;
    let (sub, mov, bits) = match elem {
        ScalarType::F32 => ("subss", "movd", ONE_F32_BITS as u64),
        _ => ("subsd", "movq", ONE_F64_BITS),
    };
    if elem == ScalarType::F32 {
        sess.asm.inst2(
            "mov",
            reg_name(g.reclassed(RegClass::Gp32)),
            format!("0x{bits:08x}"),
        );
        sess.asm.inst2(
            &format!("{v}{mov}"),
            reg_name(one),
            reg_name(g.reclassed(RegClass::Gp32)),
        );
    } else {
        sess.asm.inst2("mov", reg_name(g), format!("0x{bits:016x}"));
        sess.asm
            .inst2(&format!("{v}{mov}"), reg_name(one), reg_name(g));
    }
    sess.regs.release(g)?;
    if tier >= Tier::Avx2 {
        sess.asm.inst3(
            &format!("v{sub}"),
            reg_name(dst),
            reg_name(dst),
            reg_name(one),
        );
    } else {
        sess.asm.inst2(sub, reg_name(dst), reg_name(one));
    }
    sess.regs.release(one)?;
    Ok(())
}

/// Vector random: one scalar step per lane, packed 128 bits at a time,
/// then one bias subtraction across all lanes for floats.
fn emit_random_vector(
    sess: &mut Session,
    ty: ValueType,
    elem: ScalarType,
    lanes: u8,
) -> CodegenResult<Operand> {
    let tier = sess.tier();
    let native = ty.native_lane_count(tier);
    let count = ty.part_count(tier);
    let class = ty.part_class(tier);
    let chunk_lanes = (16 / elem.byte_size()) as u8;

    let mut parts = Vec::with_capacity(count as usize);
    let mut produced: u8 = 0;
    for p in 0..count {
        let lanes_here = if p + 1 == count {
            lanes - produced
        } else {
            native
        };
        produced += lanes_here;

        // Fill 128-bit chunks left to right.
        let mut chunks = Vec::new();
        let mut remaining = lanes_here;
        while remaining > 0 {
            let here = remaining.min(chunk_lanes);
            let chunk = sess.regs.acquire(RegClass::Xmm)?;
            for lane in 0..here {
                let raw = emit_rng_step(sess)?;
                emit_bits_for(sess, elem, raw)?;
                emit_lane_insert(sess, elem, chunk, raw, lane)?;
                sess.regs.release(raw)?;
            }
            chunks.push(chunk);
            remaining -= here;
        }

        // Assemble chunks into the part register.
        let part = assemble_chunks(sess, elem, class, chunks)?;
        if elem.is_float() {
            emit_bias_subtract(sess, elem, part)?;
        }
        parts.push(part);
    }
    Ok(Operand::parts(ty, parts))
}

/// Insert the low 32/64 bits of a general-purpose register into one lane
/// of an xmm chunk.
fn emit_lane_insert(
    sess: &mut Session,
    elem: ScalarType,
    chunk: PhysReg,
    raw: PhysReg,
    lane: u8,
) -> CodegenResult<()> {
    let tier = sess.tier();
    let c = reg_name(chunk);
    if elem.byte_size() == 4 {
        let r = reg_name(raw.reclassed(RegClass::Gp32));
        if tier >= Tier::Avx2 {
            sess.asm
                .inst4("vpinsrd", &c, &c, &r, format!("{lane}"));
        } else {
            sess.asm.inst3("pinsrd", &c, &r, format!("{lane}"));
        }
    } else {
        let r = reg_name(raw);
        if tier >= Tier::Avx2 {
            sess.asm
                .inst4("vpinsrq", &c, &c, &r, format!("{lane}"));
        } else {
            sess.asm.inst3("pinsrq", &c, &r, format!("{lane}"));
        }
    }
    Ok(())
}

/// Combine 128-bit chunks into one register of the part's class.
fn assemble_chunks(
    sess: &mut Session,
    elem: ScalarType,
    class: RegClass,
    chunks: Vec<PhysReg>,
) -> CodegenResult<PhysReg> {
    match class {
        RegClass::Zmm => {
            let insert = if elem.is_float() && elem == ScalarType::F64 {
                "vinsertf64x2"
            } else if elem.is_float() {
                "vinsertf32x4"
            } else {
                "vinserti32x4"
            };
            let dst = chunks[0].reclassed(RegClass::Zmm);
            for (i, &chunk) in chunks.iter().enumerate().skip(1) {
                sess.asm.inst4(
                    insert,
                    reg_name(dst),
                    reg_name(dst),
                    reg_name(chunk),
                    format!("{i}"),
                );
                sess.regs.release(chunk)?;
            }
            Ok(dst)
        }
        RegClass::Ymm => {
            let insert = if elem.is_float() { "vinsertf128" } else { "vinserti128" };
            let dst = chunks[0].reclassed(RegClass::Ymm);
            if let Some(&hi) = chunks.get(1) {
                sess.asm
                    .inst4(insert, reg_name(dst), reg_name(dst), reg_name(hi), "1");
                sess.regs.release(hi)?;
            }
            Ok(dst)
        }
        _ => Ok(chunks[0]),
    }
}

/// Load the kernel's worker index: execution-time state in the data
/// section, one word, bound by the runtime before the kernel runs.
fn lower_worker_index(
    sess: &mut Session,
    _op: &str,
    _operands: &[Operand],
) -> CodegenResult<Option<Operand>> {
    if !sess.data.contains(WORKER_SYMBOL) {
        sess.data.define(DataEntry {
            name: WORKER_SYMBOL.to_string(),
            ty: None,
            byte_size: 8,
            align: 8,
            init: DataInit::U64s(vec![0]),
        })?;
    }
    let dst = sess.regs.acquire(RegClass::Gp64)?;
    sess.asm.inst2("mov", reg_name(dst), data_ref(WORKER_SYMBOL));
    Ok(Some(Operand::reg(
        ValueType::Scalar(ScalarType::I64),
        dst,
    )))
}
