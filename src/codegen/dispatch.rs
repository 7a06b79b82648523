// This module implements the operator dispatch registry: multiple dispatch
// on (operator name, operand type signature) resolving to exactly one
// lowering strategy. The table is constructed once at startup from the
// strategy modules' install functions, with duplicate signatures rejected by
// an assertion at build time rather than discovered at the first ambiguous
// call. Resolution scores candidate signatures so that a load-fused AnyNamed
// catch-all wins over a generic exact signature for operands that have not
// yet been materialized into registers, while register operands always take
// the direct path. Capability predicates on the operand types gate each
// match, so unsupported operator/type combinations fail here with a clear
// UnsupportedOperation before any instruction is emitted.

//! Multi-dispatch from (operator, operand types) to lowering strategies.

use std::sync::OnceLock;

use hashbrown::HashMap;

use crate::core::error::{CodegenError, CodegenResult};
use crate::core::operand::Operand;
use crate::core::session::Session;
use crate::core::types::{ScalarType, ValueType};

/// A lowering strategy: emits instructions into the session and returns the
/// result operand (`None` for pure-effect operations such as stores).
pub type Strategy = fn(&mut Session, &str, &[Operand]) -> CodegenResult<Option<Operand>>;

/// One argument pattern within a builtin signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPat {
    /// Matches a register-located or named operand of exactly this type.
    Exact(ValueType),
    /// Catch-all for named operands not yet materialized into a register;
    /// lets a strategy fuse the load into the operation based on the
    /// declared type.
    AnyNamed,
    /// Matches an immediate constant with this literal scalar type.
    Const(ScalarType),
}

impl ArgPat {
    /// Match score: 0 = no match. Higher scores are more specific for the
    /// operand at hand; `AnyNamed` outranks `Exact` for named operands so
    /// the fused path wins exactly when a load would otherwise be emitted.
    fn score(self, operand: &Operand) -> u32 {
        match self {
            ArgPat::Exact(ty) => {
                if operand.ty != ty {
                    0
                } else if operand.in_registers() {
                    2
                } else if operand.is_named() {
                    1
                } else {
                    0
                }
            }
            ArgPat::AnyNamed => {
                if operand.is_named() {
                    2
                } else {
                    0
                }
            }
            ArgPat::Const(s) => match operand.const_value() {
                Some(v) if v.scalar_type() == s => 2,
                _ => 0,
            },
        }
    }
}

/// Capability predicate applied to a matched signature before resolution
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    None,
    /// `operands[0].ty.can_combine_with_operand(op, operands[1].ty)`.
    Combine,
    /// `operands[0].ty.can_combine_with_constant(op, constant)`.
    ConstCombine,
    /// `operands[0].ty.can_compare(op, operands[1].ty)`.
    Compare,
}

struct Overload {
    args: Vec<ArgPat>,
    gate: Gate,
    strategy: Strategy,
}

/// The dispatch table. Built once at startup; immutable afterwards.
pub struct Registry {
    table: HashMap<&'static str, Vec<Overload>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Construct the full builtin table.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        super::loadstore::install(&mut reg);
        super::arith::install(&mut reg);
        super::shift::install(&mut reg);
        super::convert::install(&mut reg);
        super::round::install(&mut reg);
        super::reduce::install(&mut reg);
        super::mask::install(&mut reg);
        super::rng::install(&mut reg);
        log::debug!("dispatch table: {} operators", reg.table.len());
        reg
    }

    /// Register one signature. Duplicate signatures for the same operator
    /// violate the disjointness invariant and abort at startup.
    pub fn register(&mut self, op: &'static str, args: Vec<ArgPat>, gate: Gate, strategy: Strategy) {
        let overloads = self.table.entry(op).or_default();
        assert!(
            !overloads.iter().any(|o| o.args == args),
            "duplicate signature registered for operator '{op}'"
        );
        overloads.push(Overload {
            args,
            gate,
            strategy,
        });
    }

    /// Resolve the strategy for an operator and concrete operand list.
    ///
    /// Fails with `NoMatchingOverload` when nothing matches, with
    /// `UnsupportedOperation` when a signature matches but its capability
    /// predicate rejects the combination, and (defensively) with
    /// `AmbiguousOverload` when two signatures match at equal specificity.
    pub fn resolve(&self, op: &str, operands: &[Operand]) -> CodegenResult<Strategy> {
        let overloads = self.table.get(op).ok_or_else(|| {
            CodegenError::NoMatchingOverload {
                op: op.to_string(),
                signature: signature_string(operands),
            }
        })?;

        let mut best_score = 0u32;
        let mut best: Vec<&Overload> = Vec::new();
        for overload in overloads {
            if overload.args.len() != operands.len() {
                continue;
            }
            let mut total = 0u32;
            let mut matched = true;
            for (pat, operand) in overload.args.iter().zip(operands) {
                let s = pat.score(operand);
                if s == 0 {
                    matched = false;
                    break;
                }
                total += s;
            }
            if !matched {
                continue;
            }
            match total.cmp(&best_score) {
                std::cmp::Ordering::Greater => {
                    best_score = total;
                    best = vec![overload];
                }
                std::cmp::Ordering::Equal => best.push(overload),
                std::cmp::Ordering::Less => {}
            }
        }

        match best.len() {
            0 => Err(CodegenError::NoMatchingOverload {
                op: op.to_string(),
                signature: signature_string(operands),
            }),
            1 => {
                let overload = best[0];
                check_gate(overload.gate, op, operands)?;
                Ok(overload.strategy)
            }
            _ => Err(CodegenError::AmbiguousOverload {
                op: op.to_string(),
                signature: signature_string(operands),
            }),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_gate(gate: Gate, op: &str, operands: &[Operand]) -> CodegenResult<()> {
    let ok = match gate {
        Gate::None => true,
        Gate::Combine => {
            operands.len() == 2 && operands[0].ty.can_combine_with_operand(op, operands[1].ty)
        }
        Gate::ConstCombine => match (operands.first(), operands.get(1).and_then(|o| o.const_value()))
        {
            (Some(a), Some(c)) => {
                if a.ty.can_combine_with_constant(op, &c) {
                    true
                } else {
                    // Distinguish a bad literal from a bad type pairing.
                    return Err(CodegenError::ConstantOutOfRange {
                        op: op.to_string(),
                        value: c.to_string(),
                    });
                }
            }
            _ => false,
        },
        Gate::Compare => {
            operands.len() == 2 && operands[0].ty.can_compare(op, operands[1].ty)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(CodegenError::UnsupportedOperation {
            op: op.to_string(),
            ty: signature_string(operands),
        })
    }
}

fn signature_string(operands: &[Operand]) -> String {
    operands
        .iter()
        .map(|o| o.ty.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The process-wide builtin table, built on first use.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_builtins)
}

/// All value types the backend accepts, for registration loops.
pub fn all_value_types() -> Vec<ValueType> {
    let mut out = Vec::new();
    for elem in SCALARS {
        out.push(ValueType::Scalar(elem));
        for &lanes in crate::core::types::VECTOR_LANES.iter() {
            out.push(ValueType::Vector { elem, lanes });
        }
    }
    out
}

pub const SCALARS: [ScalarType; 4] = [
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::F32,
    ScalarType::F64,
];

pub const FLOAT_SCALARS: [ScalarType; 2] = [ScalarType::F32, ScalarType::F64];
