use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Energy values are reported with 4 fractional digits.
pub const ENERGY_SCALE: u32 = 4;
/// Percentages and temperatures are reported with 2.
pub const PERCENT_SCALE: u32 = 2;

pub fn round_to(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Classification of AC-to-DC conversion efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    #[serde(rename = "excellent")]
    Excellent,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "critical")]
    Critical,
    #[serde(rename = "no data")]
    NoData,
}

impl Verdict {
    /// Thresholds apply to the unrounded ratio; every bucket is closed at its
    /// lower bound.
    pub fn classify(ratio: Option<Decimal>) -> Self {
        let Some(ratio) = ratio else {
            return Self::NoData;
        };

        if ratio <= Decimal::ZERO {
            Self::NoData
        } else if ratio >= Decimal::new(90, 2) {
            Self::Excellent
        } else if ratio >= Decimal::new(85, 2) {
            Self::Good
        } else if ratio >= Decimal::new(75, 2) {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::NoData => "no data",
        }
    }

    /// Operator-facing explanation of the verdict.
    pub fn detail(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent - system operating at peak efficiency",
            Self::Good => "Good - normal conversion losses detected",
            Self::Warning => "Warning - efficiency below optimal threshold, inspect charging hardware",
            Self::Critical => "Critical - significant power loss detected, immediate inspection required",
            Self::NoData => "No data - unable to calculate efficiency (missing meter or vehicle data)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyMetrics {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_ac_consumed: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_dc_delivered: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub efficiency_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub efficiency_percentage: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub power_loss: Decimal,
    #[serde(skip)]
    pub verdict: Verdict,
}

impl EnergyMetrics {
    /// Derives efficiency from window totals. Zero AC yields a zero ratio
    /// and a `NoData` verdict instead of a division error.
    pub fn from_totals(total_ac: Decimal, total_dc: Decimal) -> Self {
        let ratio = (total_ac > Decimal::ZERO).then(|| total_dc / total_ac);
        let raw_ratio = ratio.unwrap_or(Decimal::ZERO);

        Self {
            total_ac_consumed: round_to(total_ac, ENERGY_SCALE),
            total_dc_delivered: round_to(total_dc, ENERGY_SCALE),
            efficiency_ratio: round_to(raw_ratio, ENERGY_SCALE),
            efficiency_percentage: round_to(raw_ratio * Decimal::ONE_HUNDRED, PERCENT_SCALE),
            power_loss: round_to(total_ac - total_dc, ENERGY_SCALE),
            verdict: Verdict::classify(ratio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn ninety_percent_is_excellent() {
        let m = EnergyMetrics::from_totals(dec!(100), dec!(90));
        assert_eq!(m.efficiency_ratio, dec!(0.9));
        assert_eq!(m.efficiency_percentage, dec!(90));
        assert_eq!(m.power_loss, dec!(10));
        assert_eq!(m.verdict, Verdict::Excellent);
    }

    #[test]
    fn thresholds_are_inclusive_at_lower_bound() {
        assert_eq!(Verdict::classify(Some(dec!(0.85))), Verdict::Good);
        assert_eq!(Verdict::classify(Some(dec!(0.8499))), Verdict::Warning);
        assert_eq!(Verdict::classify(Some(dec!(0.75))), Verdict::Warning);
        assert_eq!(Verdict::classify(Some(dec!(0.7499))), Verdict::Critical);
    }

    #[test]
    fn zero_ac_is_no_data() {
        let m = EnergyMetrics::from_totals(Decimal::ZERO, dec!(12.5));
        assert_eq!(m.efficiency_ratio, Decimal::ZERO);
        assert_eq!(m.efficiency_percentage, Decimal::ZERO);
        assert_eq!(m.power_loss, dec!(-12.5));
        assert_eq!(m.verdict, Verdict::NoData);
    }

    #[test]
    fn zero_dc_is_no_data() {
        let m = EnergyMetrics::from_totals(dec!(100), Decimal::ZERO);
        assert_eq!(m.verdict, Verdict::NoData);
        assert_eq!(m.power_loss, dec!(100));
    }

    #[test]
    fn ratios_round_half_away_from_zero() {
        let m = EnergyMetrics::from_totals(dec!(3), dec!(2));
        assert_eq!(m.efficiency_ratio, dec!(0.6667));
        assert_eq!(m.efficiency_percentage, dec!(66.67));
        assert_eq!(m.verdict, Verdict::Critical);
    }

    #[test]
    fn verdict_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::NoData).unwrap(), "\"no data\"");
        assert_eq!(Verdict::Good.as_str(), "good");
    }
}
