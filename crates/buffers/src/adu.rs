//! Average daily usage (ADU) derived from a demand series.
//!
//! The series is ordered oldest first. The latest stored calculation per
//! product is what buffer sizing starts from.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{AduCalculationId, DomainError, DomainResult, OrganizationId, ProductId};

pub const DEFAULT_PERIOD_DAYS: u32 = 30;

/// Used when the requested smoothing factor is outside `(0, 1]`.
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AduMethod {
    Average,
    Exponential,
    Weighted,
}

impl AduMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AduMethod::Average => "average",
            AduMethod::Exponential => "exponential",
            AduMethod::Weighted => "weighted",
        }
    }

    /// ADU of `demand`. An empty series yields zero.
    pub fn compute(&self, demand: &[f64], alpha: f64) -> f64 {
        match self {
            AduMethod::Average => simple_average(demand),
            AduMethod::Exponential => exponential_smoothing(demand, alpha),
            AduMethod::Weighted => weighted_moving_average(demand),
        }
    }
}

impl core::fmt::Display for AduMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AduMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(AduMethod::Average),
            "exponential" => Ok(AduMethod::Exponential),
            "weighted" => Ok(AduMethod::Weighted),
            _ => Err(DomainError::validation("invalid ADU method")),
        }
    }
}

pub fn simple_average(demand: &[f64]) -> f64 {
    if demand.is_empty() {
        return 0.0;
    }
    demand.iter().sum::<f64>() / demand.len() as f64
}

/// Single exponential smoothing seeded with the first observation.
pub fn exponential_smoothing(demand: &[f64], alpha: f64) -> f64 {
    let alpha = if alpha > 0.0 && alpha <= 1.0 {
        alpha
    } else {
        DEFAULT_SMOOTHING_ALPHA
    };
    let mut series = demand.iter().copied();
    let Some(first) = series.next() else {
        return 0.0;
    };
    series.fold(first, |smoothed, x| alpha * x + (1.0 - alpha) * smoothed)
}

/// Linear weights `1..=n`, newest heaviest. Rounded to cents.
pub fn weighted_moving_average(demand: &[f64]) -> f64 {
    if demand.is_empty() {
        return 0.0;
    }
    let n = demand.len() as f64;
    let total_weight = n * (n + 1.0) / 2.0;
    let weighted: f64 = demand
        .iter()
        .enumerate()
        .map(|(i, x)| x * (i + 1) as f64)
        .sum();
    (weighted / total_weight * 100.0).round() / 100.0
}

fn default_period_days() -> u32 {
    DEFAULT_PERIOD_DAYS
}

/// Request to compute and store an ADU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAduCalculation {
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    /// Daily demand, oldest first.
    pub demand: Vec<f64>,
    pub method: AduMethod,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    /// Smoothing factor for [`AduMethod::Exponential`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

impl NewAduCalculation {
    pub fn validate(&self) -> DomainResult<()> {
        if self.product_id.is_nil() {
            return Err(DomainError::validation("product_id is required"));
        }
        if self.organization_id.is_nil() {
            return Err(DomainError::validation("organization_id is required"));
        }
        if self.demand.is_empty() {
            return Err(DomainError::validation("demand data is required"));
        }
        if self.demand.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(DomainError::validation("demand data must be non-negative"));
        }
        if self.period_days == 0 {
            return Err(DomainError::validation("period_days must be greater than 0"));
        }
        Ok(())
    }

    /// Validate, compute, and stamp a new record dated `now`.
    pub fn into_calculation(self, now: DateTime<Utc>) -> DomainResult<AduCalculation> {
        self.validate()?;
        let alpha = self.alpha.unwrap_or(DEFAULT_SMOOTHING_ALPHA);
        let calculation = AduCalculation {
            id: AduCalculationId::new(),
            product_id: self.product_id,
            organization_id: self.organization_id,
            calculation_date: now.date_naive(),
            adu_value: self.method.compute(&self.demand, alpha),
            method: self.method,
            period_days: self.period_days,
            data_point_count: self.demand.len(),
            created_at: now,
        };
        calculation.validate()?;
        Ok(calculation)
    }
}

/// One stored ADU. At most one per product and calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AduCalculation {
    pub id: AduCalculationId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub calculation_date: NaiveDate,
    pub adu_value: f64,
    pub method: AduMethod,
    pub period_days: u32,
    #[serde(default)]
    pub data_point_count: usize,
    pub created_at: DateTime<Utc>,
}

impl AduCalculation {
    pub fn validate(&self) -> DomainResult<()> {
        if self.product_id.is_nil() {
            return Err(DomainError::validation("product_id is required"));
        }
        if self.organization_id.is_nil() {
            return Err(DomainError::validation("organization_id is required"));
        }
        if !self.adu_value.is_finite() || self.adu_value < 0.0 {
            return Err(DomainError::validation("adu_value must be non-negative"));
        }
        if self.period_days == 0 {
            return Err(DomainError::validation("period_days must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn input(method: AduMethod, demand: &[f64]) -> NewAduCalculation {
        NewAduCalculation {
            product_id: ProductId::new(),
            organization_id: OrganizationId::new(),
            demand: demand.to_vec(),
            method,
            period_days: DEFAULT_PERIOD_DAYS,
            alpha: None,
        }
    }

    #[test]
    fn simple_average_of_a_ramp() {
        assert_eq!(simple_average(&[100.0, 150.0, 200.0, 250.0, 300.0]), 200.0);
        assert_eq!(simple_average(&[]), 0.0);
    }

    #[test]
    fn weighted_average_favours_recent_demand() {
        let ramp = [50.0, 100.0, 150.0, 200.0, 250.0];
        let weighted = weighted_moving_average(&ramp);
        assert!(weighted > simple_average(&ramp));
        // 2750 / 15
        assert_eq!(weighted, 183.33);
    }

    #[test]
    fn smoothing_falls_back_to_default_alpha() {
        let series = [10.0, 20.0];
        assert!((exponential_smoothing(&series, 0.5) - 15.0).abs() < 1e-9);
        assert!((exponential_smoothing(&series, 0.0) - 13.0).abs() < 1e-9);
        assert!((exponential_smoothing(&series, 1.5) - 13.0).abs() < 1e-9);
        assert!((exponential_smoothing(&series, f64::NAN) - 13.0).abs() < 1e-9);
        assert_eq!(exponential_smoothing(&[42.0], 0.5), 42.0);
    }

    #[test]
    fn calculation_is_stamped_with_the_day() {
        let now = Utc::now();
        let mut request = input(AduMethod::Exponential, &[10.0, 20.0]);
        request.alpha = Some(0.5);
        let calc = request.into_calculation(now).unwrap();

        assert!((calc.adu_value - 15.0).abs() < 1e-9);
        assert_eq!(calc.calculation_date, now.date_naive());
        assert_eq!(calc.data_point_count, 2);
        assert_eq!(calc.period_days, 30);
    }

    #[test]
    fn validation_messages() {
        let message = |r: NewAduCalculation| r.validate().unwrap_err().message().to_string();

        assert_eq!(message(input(AduMethod::Average, &[])), "demand data is required");
        assert_eq!(
            message(input(AduMethod::Average, &[1.0, -2.0])),
            "demand data must be non-negative"
        );

        let mut bad = input(AduMethod::Average, &[1.0]);
        bad.period_days = 0;
        assert_eq!(message(bad), "period_days must be greater than 0");

        let mut bad = input(AduMethod::Average, &[1.0]);
        bad.organization_id = OrganizationId::from_uuid(Uuid::nil());
        assert_eq!(message(bad), "organization_id is required");
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("weighted".parse::<AduMethod>().unwrap(), AduMethod::Weighted);
        assert_eq!(
            "median".parse::<AduMethod>().unwrap_err(),
            DomainError::validation("invalid ADU method")
        );
        let json = serde_json::to_value(AduMethod::Exponential).unwrap();
        assert_eq!(json, "exponential");
    }
}
