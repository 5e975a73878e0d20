//! Configuration for layer binarization and temperature scheduling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BinarizeError, Result};

/// Name of the query projection sub-layer.
pub const QUERY_LAYER: &str = "c_attn_q";
/// Name of the key projection sub-layer.
pub const KEY_LAYER: &str = "c_attn_k";
/// Name of the value projection sub-layer.
pub const VALUE_LAYER: &str = "c_attn_v";

/// Which binarized layer replaces a dense layer during surgery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinarizeKind {
    /// Hard sign with clipped straight-through gradient (`BinarizedLinear`).
    #[default]
    Basic,
    /// Scaled-tanh surrogate with analytic gradient (`IrLinear`).
    Ir,
}

impl BinarizeKind {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Ir => "ir",
        }
    }
}

impl fmt::Display for BinarizeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BinarizeKind {
    type Err = BinarizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(Self::Basic),
            "ir" => Ok(Self::Ir),
            other => Err(BinarizeError::configuration(format!(
                "unknown binarize layer kind '{other}' (expected 'basic' or 'ir')"
            ))),
        }
    }
}

/// Options controlling which dense sub-layers are replaced.
///
/// The skip flags are matched literally against sub-layer names:
/// - `kv_only` skips `c_attn_q`
/// - `qv_only` skips `c_attn_k`
/// - `qk_only` skips `c_attn_v`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinarizeConfig {
    /// Replacement layer kind.
    pub kind: BinarizeKind,

    /// Binarize only Q and K projections, leaving V dense.
    #[serde(default)]
    pub qk_only: bool,

    /// Binarize only Q and V projections, leaving K dense.
    #[serde(default)]
    pub qv_only: bool,

    /// Binarize only K and V projections, leaving Q dense.
    #[serde(default)]
    pub kv_only: bool,
}

impl BinarizeConfig {
    /// Create a configuration for the given kind with no skip flags.
    #[must_use]
    pub const fn new(kind: BinarizeKind) -> Self {
        Self {
            kind,
            qk_only: false,
            qv_only: false,
            kv_only: false,
        }
    }

    /// Set the replacement layer kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: BinarizeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Enable or disable `qk_only`.
    #[must_use]
    pub const fn with_qk_only(mut self, enabled: bool) -> Self {
        self.qk_only = enabled;
        self
    }

    /// Enable or disable `qv_only`.
    #[must_use]
    pub const fn with_qv_only(mut self, enabled: bool) -> Self {
        self.qv_only = enabled;
        self
    }

    /// Enable or disable `kv_only`.
    #[must_use]
    pub const fn with_kv_only(mut self, enabled: bool) -> Self {
        self.kv_only = enabled;
        self
    }

    /// Whether the sub-layer called `name` must be left untouched.
    #[must_use]
    pub fn should_skip(&self, name: &str) -> bool {
        (self.kv_only && name == QUERY_LAYER)
            || (self.qv_only && name == KEY_LAYER)
            || (self.qk_only && name == VALUE_LAYER)
    }
}

/// Exponential temperature schedule for scaled-tanh binarization.
///
/// ```text
/// t(step) = t_min * 10^(step / total_steps * log10(t_max / t_min))
/// ```
///
/// The schedule belongs to the training loop; layers only consume the
/// temperature they are handed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSchedule {
    /// Temperature at step 0.
    pub t_min: f64,
    /// Temperature at the final step.
    pub t_max: f64,
}

impl Default for TemperatureSchedule {
    fn default() -> Self {
        Self {
            t_min: 0.1,
            t_max: 10.0,
        }
    }
}

impl TemperatureSchedule {
    /// Create a schedule between `t_min` and `t_max`.
    ///
    /// # Errors
    ///
    /// Returns error if the bounds are invalid.
    pub fn new(t_min: f64, t_max: f64) -> Result<Self> {
        let schedule = Self { t_min, t_max };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Validate the schedule bounds.
    ///
    /// # Errors
    ///
    /// Returns error if `t_min` is not positive or `t_max < t_min`.
    pub fn validate(&self) -> Result<()> {
        if !(self.t_min.is_finite() && self.t_min > 0.0) {
            return Err(BinarizeError::configuration("t_min must be finite and > 0"));
        }
        if !(self.t_max.is_finite() && self.t_max >= self.t_min) {
            return Err(BinarizeError::configuration(
                "t_max must be finite and >= t_min",
            ));
        }
        Ok(())
    }

    /// Temperature for `step` out of `total_steps`.
    ///
    /// Steps past the end return `t_max`; `total_steps == 0` returns `t_max`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn temperature(&self, step: usize, total_steps: usize) -> f64 {
        if total_steps == 0 {
            return self.t_max;
        }
        let progress = step.min(total_steps) as f64 / total_steps as f64;
        self.t_min * 10f64.powf(progress * (self.t_max / self.t_min).log10())
    }
}
