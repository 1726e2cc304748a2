//! Time-windowed demand adjustment factors (FAD, seasonal, ...).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{AdjustmentId, DomainError, DomainResult, OrganizationId, ProductId, UserId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Fad,
    Seasonal,
    NewProduct,
    Discontinue,
    Promotion,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Fad => "fad",
            AdjustmentType::Seasonal => "seasonal",
            AdjustmentType::NewProduct => "new_product",
            AdjustmentType::Discontinue => "discontinue",
            AdjustmentType::Promotion => "promotion",
        }
    }
}

impl core::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_window(
    factor: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    reason: &str,
) -> DomainResult<()> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(DomainError::validation("factor must be non-negative"));
    }
    if end_date < start_date {
        return Err(DomainError::validation("end_date must be >= start_date"));
    }
    if reason.trim().is_empty() {
        return Err(DomainError::validation("reason is required"));
    }
    Ok(())
}

/// Input for creating an adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDemandAdjustment {
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub adjustment_type: AdjustmentType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub factor: f64,
    pub reason: String,
    pub created_by: UserId,
}

impl NewDemandAdjustment {
    pub fn validate(&self) -> DomainResult<()> {
        if self.product_id.is_nil() {
            return Err(DomainError::validation("product_id is required"));
        }
        if self.organization_id.is_nil() {
            return Err(DomainError::validation("organization_id is required"));
        }
        if self.created_by.is_nil() {
            return Err(DomainError::validation("created_by is required"));
        }
        validate_window(self.factor, self.start_date, self.end_date, &self.reason)
    }

    /// Validate and stamp a new record.
    pub fn into_adjustment(self, now: DateTime<Utc>) -> DomainResult<DemandAdjustment> {
        self.validate()?;
        Ok(DemandAdjustment {
            id: AdjustmentId::new(),
            product_id: self.product_id,
            organization_id: self.organization_id,
            adjustment_type: self.adjustment_type,
            start_date: self.start_date,
            end_date: self.end_date,
            factor: self.factor,
            reason: self.reason,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Replacement values for the mutable fields of an adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentChanges {
    pub adjustment_type: AdjustmentType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub factor: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandAdjustment {
    pub id: AdjustmentId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub adjustment_type: AdjustmentType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub factor: f64,
    pub reason: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DemandAdjustment {
    /// Inclusive on both ends.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Replace the mutable fields. On a validation error nothing changes.
    pub fn apply(&mut self, changes: AdjustmentChanges, now: DateTime<Utc>) -> DomainResult<()> {
        validate_window(
            changes.factor,
            changes.start_date,
            changes.end_date,
            &changes.reason,
        )?;
        self.adjustment_type = changes.adjustment_type;
        self.start_date = changes.start_date;
        self.end_date = changes.end_date;
        self.factor = changes.factor;
        self.reason = changes.reason;
        self.updated_at = now;
        Ok(())
    }
}

/// Product of the factors active on `date`; 1.0 when none are.
///
/// Overlapping windows compound.
pub fn active_factor<'a>(
    adjustments: impl IntoIterator<Item = &'a DemandAdjustment>,
    date: NaiveDate,
) -> f64 {
    adjustments
        .into_iter()
        .filter(|a| a.is_active_on(date))
        .map(|a| a.factor)
        .product()
}

/// Relative tolerance under which a scaled usage counts as a whole unit.
const WHOLE_UNIT_TOLERANCE: f64 = 1e-9;

/// Scale the base daily usage and round up to a whole unit.
///
/// Products that land within float noise of an integer (`100 * 1.1`) snap to
/// it instead of rounding up to the next unit.
pub fn adjusted_daily_usage(base: f64, factor: f64) -> f64 {
    let scaled = base * factor;
    let nearest = scaled.round();
    if (scaled - nearest).abs() <= WHOLE_UNIT_TOLERANCE * nearest.abs().max(1.0) {
        nearest
    } else {
        scaled.ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input() -> NewDemandAdjustment {
        NewDemandAdjustment {
            product_id: ProductId::new(),
            organization_id: OrganizationId::new(),
            adjustment_type: AdjustmentType::Seasonal,
            start_date: date(2026, 11, 1),
            end_date: date(2026, 12, 31),
            factor: 1.5,
            reason: "holiday season".into(),
            created_by: UserId::new(),
        }
    }

    fn message(result: DomainResult<()>) -> String {
        result.unwrap_err().message().to_string()
    }

    #[test]
    fn validation_messages() {
        let mut bad = input();
        bad.end_date = date(2026, 10, 31);
        assert_eq!(message(bad.validate()), "end_date must be >= start_date");

        let mut bad = input();
        bad.factor = -0.5;
        assert_eq!(message(bad.validate()), "factor must be non-negative");

        let mut bad = input();
        bad.reason = "   ".into();
        assert_eq!(message(bad.validate()), "reason is required");

        let mut bad = input();
        bad.created_by = UserId::from_uuid(Uuid::nil());
        assert_eq!(message(bad.validate()), "created_by is required");

        let mut bad = input();
        bad.product_id = ProductId::from_uuid(Uuid::nil());
        bad.factor = -1.0;
        assert_eq!(message(bad.validate()), "product_id is required");
    }

    #[test]
    fn zero_factor_and_single_day_window_are_valid() {
        let mut ok = input();
        ok.factor = 0.0;
        ok.end_date = ok.start_date;
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn window_is_inclusive() {
        let adj = input().into_adjustment(Utc::now()).unwrap();
        assert!(adj.is_active_on(date(2026, 11, 1)));
        assert!(adj.is_active_on(date(2026, 12, 31)));
        assert!(!adj.is_active_on(date(2027, 1, 1)));
        assert!(!adj.is_active_on(date(2026, 10, 31)));
    }

    #[test]
    fn overlapping_factors_compound() {
        let a = input().into_adjustment(Utc::now()).unwrap();
        let mut b = input();
        b.factor = 2.0;
        b.start_date = date(2026, 12, 1);
        let b = b.into_adjustment(Utc::now()).unwrap();

        assert_eq!(active_factor([&a, &b], date(2026, 11, 15)), 1.5);
        assert_eq!(active_factor([&a, &b], date(2026, 12, 15)), 3.0);
        assert_eq!(active_factor([&a, &b], date(2027, 3, 1)), 1.0);
        assert_eq!(active_factor(std::iter::empty(), date(2027, 3, 1)), 1.0);
    }

    #[test]
    fn adjusted_usage_rounds_up() {
        assert_eq!(adjusted_daily_usage(10.0, 1.25), 13.0);
        assert_eq!(adjusted_daily_usage(10.0, 1.0), 10.0);
        assert_eq!(adjusted_daily_usage(10.0, 0.0), 0.0);
        assert_eq!(adjusted_daily_usage(100.5, 1.0), 101.0);
    }

    #[test]
    fn float_noise_does_not_add_a_unit() {
        assert_eq!(adjusted_daily_usage(100.0, 1.1), 110.0);
        assert_eq!(adjusted_daily_usage(10.0, 0.7), 7.0);
        assert_eq!(adjusted_daily_usage(3.0, 1.1), 4.0);
        assert_eq!(adjusted_daily_usage(100.0, 1.5 * 1.2), 180.0);
    }

    #[test]
    fn invalid_update_leaves_record_untouched() {
        let mut adj = input().into_adjustment(Utc::now()).unwrap();
        let before = adj.clone();
        let err = adj
            .apply(
                AdjustmentChanges {
                    adjustment_type: AdjustmentType::Promotion,
                    start_date: date(2026, 11, 1),
                    end_date: date(2026, 11, 30),
                    factor: 1.2,
                    reason: String::new(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, DomainError::validation("reason is required"));
        assert_eq!(adj, before);
    }
}
