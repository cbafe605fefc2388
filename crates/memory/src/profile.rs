//! Compression profiles — the knobs that decide when L1 is summarized
//! into L2 and how aggressively.

use serde::{Deserialize, Serialize};

use strand_domain::config::MemoryOverrides;
use strand_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionProfile {
    pub name: String,
    /// Token budget for the hot layer.
    pub max_l1_tokens: u32,
    /// Message-count bound on the hot layer.
    pub max_l1_messages: usize,
    /// Never compress below this many hot messages.
    pub min_l1_messages: usize,
    pub warning_threshold_pct: f64,
    pub critical_threshold_pct: f64,
    pub normal_batch_size: usize,
    pub warning_batch_size: usize,
    pub critical_batch_size: usize,
}

impl CompressionProfile {
    pub fn balanced() -> Self {
        Self {
            name: "balanced".into(),
            max_l1_tokens: 30_000,
            max_l1_messages: 40,
            min_l1_messages: 5,
            warning_threshold_pct: 70.0,
            critical_threshold_pct: 85.0,
            normal_batch_size: 4,
            warning_batch_size: 8,
            critical_batch_size: 12,
        }
    }

    /// Heavy tool traffic: compress earlier and in bigger bites.
    pub fn data_intensive() -> Self {
        Self {
            name: "data_intensive".into(),
            max_l1_tokens: 20_000,
            max_l1_messages: 30,
            min_l1_messages: 3,
            warning_threshold_pct: 60.0,
            critical_threshold_pct: 80.0,
            normal_batch_size: 6,
            warning_batch_size: 10,
            critical_batch_size: 16,
        }
    }

    /// Long dialog, little tool output: keep more verbatim history.
    pub fn conversational() -> Self {
        Self {
            name: "conversational".into(),
            max_l1_tokens: 50_000,
            max_l1_messages: 60,
            min_l1_messages: 8,
            warning_threshold_pct: 75.0,
            critical_threshold_pct: 90.0,
            normal_batch_size: 3,
            warning_batch_size: 6,
            critical_batch_size: 10,
        }
    }

    /// Resolve a preset by name; unknown names get `balanced`.
    pub fn preset(name: &str) -> Self {
        match name {
            "data_intensive" => Self::data_intensive(),
            "conversational" => Self::conversational(),
            _ => Self::balanced(),
        }
    }

    /// Apply per-deployment overrides on top of the preset.
    pub fn with_overrides(mut self, overrides: &MemoryOverrides) -> Self {
        if let Some(v) = overrides.max_l1_tokens {
            self.max_l1_tokens = v;
        }
        if let Some(v) = overrides.min_l1_messages {
            self.min_l1_messages = v;
        }
        if let Some(v) = overrides.warning_threshold_pct {
            self.warning_threshold_pct = v;
        }
        if let Some(v) = overrides.critical_threshold_pct {
            self.critical_threshold_pct = v;
        }
        if let Some(v) = overrides.normal_batch_size {
            self.normal_batch_size = v;
        }
        if let Some(v) = overrides.warning_batch_size {
            self.warning_batch_size = v;
        }
        if let Some(v) = overrides.critical_batch_size {
            self.critical_batch_size = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.critical_threshold_pct <= 0.0 || self.critical_threshold_pct > 100.0 {
            return Err(Error::InvalidInput(format!(
                "critical threshold {} out of (0, 100]",
                self.critical_threshold_pct
            )));
        }
        if self.warning_threshold_pct >= self.critical_threshold_pct {
            return Err(Error::InvalidInput(
                "warning threshold must be below critical".into(),
            ));
        }
        if !(self.normal_batch_size <= self.warning_batch_size
            && self.warning_batch_size <= self.critical_batch_size)
        {
            return Err(Error::InvalidInput(
                "batch sizes must be ordered normal ≤ warning ≤ critical".into(),
            ));
        }
        if self.min_l1_messages > 20 {
            return Err(Error::InvalidInput(format!(
                "min_l1_messages {} exceeds 20",
                self.min_l1_messages
            )));
        }
        if self.max_l1_tokens > 200_000 {
            return Err(Error::InvalidInput(format!(
                "max_l1_tokens {} exceeds 200000",
                self.max_l1_tokens
            )));
        }
        Ok(())
    }

    /// Multiplier applied to the dynamically allocated L1 target.
    fn l1_multiplier(&self) -> f64 {
        match self.name.as_str() {
            "data_intensive" => 0.6,
            "conversational" => 1.5,
            _ => 1.0,
        }
    }
}

/// Limits derived from the actual window size, so small (Ollama-class)
/// and very large (200K-class) windows both get sensible layer sizes.
#[derive(Debug, Clone, Copy)]
pub struct DerivedLimits {
    pub available: u32,
    pub max_l1_tokens: u32,
    pub max_l2_tokens: u32,
    pub min_l1_messages: usize,
}

impl DerivedLimits {
    pub fn derive(
        profile: &CompressionProfile,
        max_context_tokens: u32,
        reserved_output_tokens: u32,
        rom_tokens: u32,
        kernel_estimate: u32,
    ) -> Self {
        let available = max_context_tokens
            .saturating_sub(reserved_output_tokens)
            .saturating_sub(rom_tokens)
            .saturating_sub(kernel_estimate);

        let l2_pct = if available < 50_000 {
            0.05
        } else if available <= 100_000 {
            0.08
        } else {
            0.10
        };
        let max_l2_tokens = (f64::from(available) * l2_pct) as u32;

        let l1_target = f64::from(available) * 0.5 * profile.l1_multiplier();
        let max_l1_tokens = (l1_target as u32).clamp(1_000, 150_000);

        let min_l1_messages = if available < 10_000 {
            2
        } else if available < 50_000 {
            3
        } else if available <= 100_000 {
            4
        } else {
            5
        };

        Self {
            available,
            max_l1_tokens,
            max_l2_tokens,
            min_l1_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for profile in [
            CompressionProfile::balanced(),
            CompressionProfile::data_intensive(),
            CompressionProfile::conversational(),
        ] {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn unknown_preset_is_balanced() {
        assert_eq!(CompressionProfile::preset("nope").name, "balanced");
        assert_eq!(
            CompressionProfile::preset("data_intensive").name,
            "data_intensive"
        );
    }

    #[test]
    fn validation_rejects_bad_thresholds() {
        let mut profile = CompressionProfile::balanced();
        profile.critical_threshold_pct = 120.0;
        assert!(profile.validate().is_err());

        let mut profile = CompressionProfile::balanced();
        profile.warning_threshold_pct = 90.0;
        profile.critical_threshold_pct = 85.0;
        assert!(profile.validate().is_err());

        let mut profile = CompressionProfile::balanced();
        profile.normal_batch_size = 20;
        assert!(profile.validate().is_err());

        let mut profile = CompressionProfile::balanced();
        profile.min_l1_messages = 21;
        assert!(profile.validate().is_err());

        let mut profile = CompressionProfile::balanced();
        profile.max_l1_tokens = 200_001;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn overrides_apply() {
        let overrides = MemoryOverrides {
            max_l1_tokens: Some(12_000),
            warning_threshold_pct: Some(65.0),
            ..Default::default()
        };
        let profile = CompressionProfile::balanced().with_overrides(&overrides);
        assert_eq!(profile.max_l1_tokens, 12_000);
        assert!((profile.warning_threshold_pct - 65.0).abs() < f64::EPSILON);
        // Untouched fields keep preset values.
        assert_eq!(profile.min_l1_messages, 5);
    }

    #[test]
    fn small_window_derivation() {
        // Ollama-class 8K window.
        let limits = DerivedLimits::derive(&CompressionProfile::balanced(), 8_000, 1_000, 500, 200);
        assert_eq!(limits.available, 6_300);
        assert_eq!(limits.min_l1_messages, 2);
        // 5% L2 cap on small windows.
        assert_eq!(limits.max_l2_tokens, 315);
        // L1 floor holds.
        assert!(limits.max_l1_tokens >= 1_000);
    }

    #[test]
    fn large_window_derivation() {
        // Claude-class 200K window.
        let limits =
            DerivedLimits::derive(&CompressionProfile::balanced(), 200_000, 8_000, 2_000, 1_000);
        assert_eq!(limits.available, 189_000);
        assert_eq!(limits.min_l1_messages, 5);
        assert_eq!(limits.max_l2_tokens, 18_900);
        // Half of available stays under the 150K ceiling.
        assert_eq!(limits.max_l1_tokens, 94_500);
    }

    #[test]
    fn profile_multiplier_shapes_l1() {
        let balanced =
            DerivedLimits::derive(&CompressionProfile::balanced(), 100_000, 4_000, 0, 0);
        let data =
            DerivedLimits::derive(&CompressionProfile::data_intensive(), 100_000, 4_000, 0, 0);
        let convo =
            DerivedLimits::derive(&CompressionProfile::conversational(), 100_000, 4_000, 0, 0);
        assert!(data.max_l1_tokens < balanced.max_l1_tokens);
        assert!(convo.max_l1_tokens > balanced.max_l1_tokens);
    }
}
