use std::fmt;

use super::StreamKind;

/// Numeric suffix shared by a meter and the vehicle it charges.
///
/// Correlation is never stored: `meter_042` and `vehicle_042` belong to the
/// same physical charging session because their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the correlation key of a device identity.
///
/// The key is the last run of ASCII digits, leading zeros included
/// (`vehicle_001` -> `001`). An identity without digits is its own key.
pub fn extract_correlation_key(identity: &str) -> CorrelationKey {
    let bytes = identity.as_bytes();

    match bytes.iter().rposition(|b| b.is_ascii_digit()) {
        Some(end) => {
            let start = bytes[..end]
                .iter()
                .rposition(|b| !b.is_ascii_digit())
                .map_or(0, |idx| idx + 1);
            CorrelationKey(identity[start..=end].to_string())
        }
        None => CorrelationKey(identity.to_string()),
    }
}

/// A meter identity together with its correlated vehicle identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedPair {
    pub meter_id: String,
    pub vehicle_id: String,
}

impl CorrelatedPair {
    /// Resolves the pair for either side. Identities without a meter prefix
    /// are treated as the vehicle side.
    pub fn resolve(identity: &str) -> Self {
        let key = extract_correlation_key(identity);

        match StreamKind::of_identity(identity) {
            Some(StreamKind::Meter) => Self {
                meter_id: identity.to_string(),
                vehicle_id: StreamKind::Vehicle.identity_for(&key),
            },
            _ => Self {
                meter_id: StreamKind::Meter.identity_for(&key),
                vehicle_id: identity.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_trailing_digit_run() {
        assert_eq!(extract_correlation_key("vehicle_001").as_str(), "001");
        assert_eq!(extract_correlation_key("meter_42").as_str(), "42");
        assert_eq!(extract_correlation_key("meter_7_bay12").as_str(), "12");
    }

    #[test]
    fn identity_without_digits_is_its_own_key() {
        assert_eq!(extract_correlation_key("depot").as_str(), "depot");
    }

    #[test]
    fn pair_resolves_from_either_side() {
        let from_vehicle = CorrelatedPair::resolve("vehicle_001");
        assert_eq!(from_vehicle.meter_id, "meter_001");
        assert_eq!(from_vehicle.vehicle_id, "vehicle_001");

        let from_meter = CorrelatedPair::resolve("meter_001");
        assert_eq!(from_meter, from_vehicle);
    }
}
