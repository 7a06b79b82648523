//! ISA tier model and CPU capability detection.
//!
//! Every lowering strategy branches on the active [`Tier`], so the rules
//! here are deliberately rigid: tiers are totally ordered, capability flags
//! are monotonically inclusive (a CPU that supports a tier supports every
//! tier below it), and detection happens exactly once per process. Tests
//! build synthetic capability sets with [`CpuCaps::for_tier`] to lower the
//! same operation stream under every tier on one machine.

use std::sync::OnceLock;

/// One ISA capability level, ordered from baseline to widest.
///
/// `Sse42` is the always-available baseline (x86-64-v2: SSE2 through
/// SSE4.2), `Avx2` adds 256-bit vectors and FMA, `Avx512` adds 512-bit
/// vectors and the `k` predicate register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Sse42,
    Avx2,
    Avx512,
}

impl Tier {
    /// Width in bytes of the widest vector register this tier can use.
    pub fn vector_bytes(self) -> u32 {
        match self {
            Tier::Sse42 => 16,
            Tier::Avx2 => 32,
            Tier::Avx512 => 64,
        }
    }

    /// All tiers, lowest first. Used by tests to sweep the tier space.
    pub const ALL: [Tier; 3] = [Tier::Sse42, Tier::Avx2, Tier::Avx512];

    pub fn name(self) -> &'static str {
        match self {
            Tier::Sse42 => "sse4.2",
            Tier::Avx2 => "avx2",
            Tier::Avx512 => "avx512",
        }
    }
}

/// Immutable CPU capability flags.
///
/// Invariant: flags are monotonically inclusive. `avx512` implies `avx2`;
/// the baseline is unconditional. Constructors uphold this, and tier
/// selection logic is allowed to assume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCaps {
    avx2: bool,
    avx512: bool,
}

impl CpuCaps {
    /// Capability set for exactly the given tier (and everything below it).
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            avx2: tier >= Tier::Avx2,
            avx512: tier >= Tier::Avx512,
        }
    }

    /// Probe the host CPU. The result is cached for the process lifetime.
    pub fn detect() -> Self {
        static DETECTED: OnceLock<CpuCaps> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let caps = Self::probe();
            log::debug!(
                "detected ISA tier {} (avx2={}, avx512={})",
                caps.highest_supported_tier().name(),
                caps.avx2,
                caps.avx512
            );
            caps
        })
    }

    #[cfg(target_arch = "x86_64")]
    fn probe() -> Self {
        let avx512 = is_x86_feature_detected!("avx512f")
            && is_x86_feature_detected!("avx512bw")
            && is_x86_feature_detected!("avx512dq")
            && is_x86_feature_detected!("avx512vl");
        let avx2 = avx512
            || (is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"));
        Self { avx2, avx512 }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn probe() -> Self {
        // Cross-compiling the backend itself is fine; the emitted text is
        // x86-64 regardless, but only the baseline can be assumed.
        Self {
            avx2: false,
            avx512: false,
        }
    }

    /// Whether the given tier is usable under these capabilities.
    pub fn supports(&self, tier: Tier) -> bool {
        match tier {
            Tier::Sse42 => true,
            Tier::Avx2 => self.avx2,
            Tier::Avx512 => self.avx512,
        }
    }

    /// The widest usable tier.
    pub fn highest_supported_tier(&self) -> Tier {
        if self.avx512 {
            Tier::Avx512
        } else if self.avx2 {
            Tier::Avx2
        } else {
            Tier::Sse42
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Sse42 < Tier::Avx2);
        assert!(Tier::Avx2 < Tier::Avx512);
        assert_eq!(Tier::Sse42.vector_bytes(), 16);
        assert_eq!(Tier::Avx2.vector_bytes(), 32);
        assert_eq!(Tier::Avx512.vector_bytes(), 64);
    }

    #[test]
    fn synthetic_caps_are_monotonic() {
        for tier in Tier::ALL {
            let caps = CpuCaps::for_tier(tier);
            assert_eq!(caps.highest_supported_tier(), tier);
            for lower in Tier::ALL.iter().filter(|t| **t <= tier) {
                assert!(caps.supports(*lower));
            }
            for higher in Tier::ALL.iter().filter(|t| **t > tier) {
                assert!(!caps.supports(*higher));
            }
        }
    }

    #[test]
    fn detection_is_stable() {
        let a = CpuCaps::detect();
        let b = CpuCaps::detect();
        assert_eq!(a, b);
        assert!(a.supports(Tier::Sse42));
    }
}
