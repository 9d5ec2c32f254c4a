use serde::{Deserialize, Serialize};

/// Maximum nodes in a skeleton. The packed node index fields are signed
/// bytes in some downstream consumers so this can't simply be raised.
pub const MAX_NODES: usize = 64;

/// Maximum compiled geometries in one model
pub const MAX_GEOMETRIES: usize = 256;

/// Markers per permutation above which the whole set is promoted to the
/// global marker table
pub const MAX_LOCAL_MARKERS: usize = 32;

/// Longest single triangle strip the index stream format allows
pub const MAX_STRIP_LEN: usize = 32_760;

/// Reserved index value used to terminate a strip stream and to pad it
/// to a multiple of 3. Never a valid vertex index.
pub const STRIP_END: u16 = 0xFFFF;

/// Source units per world unit. JMS documents are authored at 100x.
pub const UNIT_SCALE: f32 = 0.01;

/// Packed node and region names are fixed 32 byte fields with a
/// terminating nul, so 31 usable bytes.
pub const NAME_LEN: usize = 31;

/// Per-component tolerance when comparing node rotations across files
pub const ROTATION_EPSILON: f32 = 1e-5;

/// Per-axis tolerance when comparing node translations across files
pub const TRANSLATION_EPSILON: f32 = 1e-6;

/// Number of detail tiers a permutation may provide geometry for
pub const LOD_COUNT: usize = 5;

/// Detail tiers, highest to lowest. The discriminant is the slot index
/// used everywhere a per-LOD array appears.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LodTier {
    SuperHigh = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    SuperLow = 4,
}

impl LodTier {
    pub const ALL: [Self; LOD_COUNT] = [
        Self::SuperHigh,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::SuperLow,
    ];

    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SuperHigh => "superhigh",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::SuperLow => "superlow",
        }
    }

    /// Parses the tier name used in source document naming conventions
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "superhigh" => Some(Self::SuperHigh),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "superlow" => Some(Self::SuperLow),
            _ => None,
        }
    }
}
