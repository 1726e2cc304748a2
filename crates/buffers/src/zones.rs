//! Zone sizing and classification.
//!
//! All functions here are pure. Thresholds are cumulative:
//! `top_of_red = red_zone`, `top_of_yellow = top_of_red + yellow_zone`,
//! `top_of_green = top_of_yellow + green_zone`.

use serde::{Deserialize, Serialize};

use ddmrp_core::{DomainError, DomainResult};

/// Where the net flow position sits relative to the thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    BelowRed,
    Red,
    Yellow,
    Green,
    Overstock,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::BelowRed => "below_red",
            Zone::Red => "red",
            Zone::Yellow => "yellow",
            Zone::Green => "green",
            Zone::Overstock => "overstock",
        }
    }

    /// Lower is more depleted.
    pub fn depletion_rank(&self) -> u8 {
        match self {
            Zone::BelowRed => 0,
            Zone::Red => 1,
            Zone::Yellow => 2,
            Zone::Green => 3,
            Zone::Overstock => 4,
        }
    }

    pub fn is_red_or_below(&self) -> bool {
        matches!(self, Zone::BelowRed | Zone::Red)
    }
}

impl core::fmt::Display for Zone {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency derived from the zone. Ordered by severity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Watch,
    Replenish,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Watch => "watch",
            AlertLevel::Replenish => "replenish",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn requires_action(&self) -> bool {
        matches!(self, AlertLevel::Replenish | AlertLevel::Critical)
    }
}

impl core::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a net flow position. Total over all finite inputs.
pub fn zone_for(nfp: f64, top_of_red: f64, top_of_yellow: f64, top_of_green: f64) -> Zone {
    if nfp <= 0.0 {
        Zone::BelowRed
    } else if nfp <= top_of_red {
        Zone::Red
    } else if nfp <= top_of_yellow {
        Zone::Yellow
    } else if nfp <= top_of_green {
        Zone::Green
    } else {
        Zone::Overstock
    }
}

/// Red splits at its midpoint: the lower half is critical.
pub fn alert_level_for(zone: Zone, nfp: f64, top_of_red: f64) -> AlertLevel {
    match zone {
        Zone::BelowRed => AlertLevel::Critical,
        Zone::Red if nfp <= top_of_red / 2.0 => AlertLevel::Critical,
        Zone::Red => AlertLevel::Replenish,
        Zone::Yellow => AlertLevel::Watch,
        Zone::Green | Zone::Overstock => AlertLevel::Normal,
    }
}

/// `1 - nfp / top_of_green`, clamped to `[0, 1]`.
///
/// A zero-height buffer is fully penetrated at or below zero and untouched above it.
pub fn penetration(nfp: f64, top_of_green: f64) -> f64 {
    if top_of_green <= 0.0 {
        return if nfp <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - nfp / top_of_green).clamp(0.0, 1.0)
}

/// Everything zone sizing needs, already resolved from catalog and consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInputs {
    /// Adjusted daily consumption.
    pub adc: f64,
    /// Decoupled lead time in days.
    pub ltd: u32,
    pub lead_time_factor: f64,
    pub variability_factor: f64,
    pub order_cycle_days: u32,
    pub minimum_order_quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSizing {
    pub red_base: f64,
    pub red_safe: f64,
    pub red_zone: f64,
    pub yellow_zone: f64,
    pub green_zone: f64,
    pub top_of_red: f64,
    pub top_of_yellow: f64,
    pub top_of_green: f64,
}

impl ZoneSizing {
    /// Size the zones.
    ///
    /// Non-positive consumption or lead time is rejected instead of producing
    /// a zero-width buffer.
    pub fn compute(inputs: &SizingInputs) -> DomainResult<Self> {
        if !inputs.adc.is_finite() || inputs.adc <= 0.0 {
            return Err(DomainError::validation("adjusted daily usage must be positive"));
        }
        if inputs.ltd == 0 {
            return Err(DomainError::validation("lead time days must be positive"));
        }
        if !inputs.lead_time_factor.is_finite() || inputs.lead_time_factor < 0.0 {
            return Err(DomainError::validation("lead_time_factor must be non-negative"));
        }
        if !inputs.variability_factor.is_finite() || inputs.variability_factor < 0.0 {
            return Err(DomainError::validation("variability_factor must be non-negative"));
        }
        if !inputs.minimum_order_quantity.is_finite() || inputs.minimum_order_quantity < 0.0 {
            return Err(DomainError::validation("minimum order quantity must be non-negative"));
        }

        let ltd = f64::from(inputs.ltd);
        let red_base = inputs.adc * ltd * inputs.lead_time_factor;
        let red_safe = red_base * inputs.variability_factor;
        let yellow_zone = inputs.adc * ltd;
        let green_zone =
            (inputs.adc * f64::from(inputs.order_cycle_days)).max(inputs.minimum_order_quantity);

        Ok(Self::from_zones(red_base, red_safe, yellow_zone, green_zone))
    }

    /// Stack already-sized zones into cumulative thresholds.
    pub fn from_zones(red_base: f64, red_safe: f64, yellow_zone: f64, green_zone: f64) -> Self {
        let red_zone = red_base + red_safe;
        let top_of_red = red_zone;
        let top_of_yellow = top_of_red + yellow_zone;
        let top_of_green = top_of_yellow + green_zone;
        Self {
            red_base,
            red_safe,
            red_zone,
            yellow_zone,
            green_zone,
            top_of_red,
            top_of_yellow,
            top_of_green,
        }
    }

    pub fn zone_for(&self, nfp: f64) -> Zone {
        zone_for(nfp, self.top_of_red, self.top_of_yellow, self.top_of_green)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs() -> SizingInputs {
        SizingInputs {
            adc: 10.0,
            ltd: 10,
            lead_time_factor: 0.5,
            variability_factor: 0.5,
            order_cycle_days: 7,
            minimum_order_quantity: 0.0,
        }
    }

    #[test]
    fn sizes_zones_from_profile_and_consumption() {
        let sizing = ZoneSizing::compute(&inputs()).unwrap();
        assert_eq!(sizing.red_base, 50.0);
        assert_eq!(sizing.red_safe, 25.0);
        assert_eq!(sizing.red_zone, 75.0);
        assert_eq!(sizing.yellow_zone, 100.0);
        assert_eq!(sizing.green_zone, 70.0);
        assert_eq!(sizing.top_of_red, 75.0);
        assert_eq!(sizing.top_of_yellow, 175.0);
        assert_eq!(sizing.top_of_green, 245.0);
    }

    #[test]
    fn minimum_order_quantity_floors_the_green_zone() {
        let sizing = ZoneSizing::compute(&SizingInputs {
            minimum_order_quantity: 500.0,
            ..inputs()
        })
        .unwrap();
        assert_eq!(sizing.green_zone, 500.0);
    }

    #[test]
    fn zero_width_inputs_are_rejected() {
        let err = ZoneSizing::compute(&SizingInputs { adc: 0.0, ..inputs() }).unwrap_err();
        assert_eq!(err, DomainError::validation("adjusted daily usage must be positive"));

        let err = ZoneSizing::compute(&SizingInputs { ltd: 0, ..inputs() }).unwrap_err();
        assert_eq!(err, DomainError::validation("lead time days must be positive"));
    }

    #[test]
    fn zone_boundaries_are_inclusive_at_the_top() {
        let s = ZoneSizing::from_zones(100.0, 0.0, 100.0, 100.0);
        assert_eq!(s.zone_for(0.0), Zone::BelowRed);
        assert_eq!(s.zone_for(0.01), Zone::Red);
        assert_eq!(s.zone_for(100.0), Zone::Red);
        assert_eq!(s.zone_for(200.0), Zone::Yellow);
        assert_eq!(s.zone_for(300.0), Zone::Green);
        assert_eq!(s.zone_for(300.01), Zone::Overstock);
    }

    #[test]
    fn red_zone_splits_into_critical_and_replenish() {
        assert_eq!(alert_level_for(Zone::Red, 40.0, 100.0), AlertLevel::Critical);
        assert_eq!(alert_level_for(Zone::Red, 50.0, 100.0), AlertLevel::Critical);
        assert_eq!(alert_level_for(Zone::Red, 51.0, 100.0), AlertLevel::Replenish);
        assert_eq!(alert_level_for(Zone::Yellow, 150.0, 100.0), AlertLevel::Watch);
        assert_eq!(alert_level_for(Zone::Overstock, 1e9, 100.0), AlertLevel::Normal);
    }

    #[test]
    fn penetration_handles_degenerate_buffers() {
        assert_eq!(penetration(-5.0, 0.0), 1.0);
        assert_eq!(penetration(5.0, 0.0), 0.0);
        assert_eq!(penetration(-5.0, 100.0), 1.0);
        assert_eq!(penetration(500.0, 100.0), 0.0);
        assert!((penetration(25.0, 100.0) - 0.75).abs() < 1e-12);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 1000,
            ..ProptestConfig::default()
        })]

        /// Property: thresholds are ordered for every valid sizing.
        #[test]
        fn thresholds_are_ordered(
            adc in 0.001f64..10_000.0,
            ltd in 1u32..365,
            ltf in 0.0f64..2.0,
            vf in 0.0f64..2.0,
            cycle in 0u32..90,
            moq in 0.0f64..100_000.0,
        ) {
            let sizing = ZoneSizing::compute(&SizingInputs {
                adc,
                ltd,
                lead_time_factor: ltf,
                variability_factor: vf,
                order_cycle_days: cycle,
                minimum_order_quantity: moq,
            }).unwrap();

            prop_assert!(0.0 <= sizing.top_of_red);
            prop_assert!(sizing.top_of_red <= sizing.top_of_yellow);
            prop_assert!(sizing.top_of_yellow <= sizing.top_of_green);
        }

        /// Property: exactly one zone per position, and it is the one the thresholds bracket.
        #[test]
        fn zone_is_total_and_consistent(
            red in 0.0f64..1_000.0,
            yellow in 0.0f64..1_000.0,
            green in 0.0f64..1_000.0,
            nfp in -2_000.0f64..4_000.0,
        ) {
            let s = ZoneSizing::from_zones(red, 0.0, yellow, green);
            let zone = s.zone_for(nfp);
            prop_assert_eq!(zone, s.zone_for(nfp));

            let expected = if nfp <= 0.0 {
                Zone::BelowRed
            } else if nfp <= s.top_of_red {
                Zone::Red
            } else if nfp <= s.top_of_yellow {
                Zone::Yellow
            } else if nfp <= s.top_of_green {
                Zone::Green
            } else {
                Zone::Overstock
            };
            prop_assert_eq!(zone, expected);

            let p = penetration(nfp, s.top_of_green);
            prop_assert!((0.0..=1.0).contains(&p));
        }

        /// Property: a more depleted zone never carries a less severe alert.
        #[test]
        fn alert_severity_is_monotonic_in_depletion(
            red in 1.0f64..1_000.0,
            yellow in 1.0f64..1_000.0,
            green in 1.0f64..1_000.0,
            a in -2_000.0f64..4_000.0,
            b in -2_000.0f64..4_000.0,
        ) {
            let s = ZoneSizing::from_zones(red, 0.0, yellow, green);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let alert_lo = alert_level_for(s.zone_for(lo), lo, s.top_of_red);
            let alert_hi = alert_level_for(s.zone_for(hi), hi, s.top_of_red);
            prop_assert!(alert_lo >= alert_hi);
        }
    }
}
