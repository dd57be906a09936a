//! Fixed-scale text encoding for monetary values.
//!
//! Amounts are stored as text padded to the configured scale so that stored
//! values compare exactly against what clients submitted. `Decimal` keeps at
//! most 28 fractional digits; anything past that is written as zero padding.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

pub const MAX_DECIMAL_SCALE: u32 = 30;
const NATIVE_SCALE: u32 = 28;

pub fn to_fixed(value: Decimal, scale: u32) -> String {
    let scale = scale.min(MAX_DECIMAL_SCALE);
    let native = scale.min(NATIVE_SCALE);
    let rounded = value.round_dp_with_strategy(native, RoundingStrategy::MidpointAwayFromZero);
    let mut rendered = format!("{:.*}", native as usize, rounded);

    if scale > native {
        if native == 0 {
            rendered.push('.');
        }
        rendered.extend(std::iter::repeat('0').take((scale - native) as usize));
    }

    rendered
}

/// True when `value` carries more significant fractional digits than `scale`
/// can store without rounding.
pub fn exceeds_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() > scale.min(MAX_DECIMAL_SCALE)
}

pub fn parse_fixed(value: &str) -> Result<Decimal, rust_decimal::Error> {
    let trimmed = value.trim();
    let normalized = match trimmed.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => trimmed.to_string(),
    };

    Decimal::from_str(&normalized)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{exceeds_scale, parse_fixed, to_fixed};

    #[test]
    fn trailing_zeros_do_not_count_against_scale() {
        assert!(!exceeds_scale(Decimal::new(1500, 3), 2));
        assert!(exceeds_scale(Decimal::new(14, 3), 2));
        assert!(!exceeds_scale(Decimal::new(14, 3), 30));
    }

    #[test]
    fn pads_to_thirty_places() {
        assert_eq!(to_fixed(Decimal::new(1000, 0), 30), "1000.000000000000000000000000000000");
        assert_eq!(to_fixed(Decimal::new(90050, 2), 30), "900.500000000000000000000000000000");
    }

    #[test]
    fn rounds_to_narrow_scales() {
        assert_eq!(to_fixed(Decimal::new(12345, 3), 2), "12.35");
        assert_eq!(to_fixed(Decimal::new(5, 0), 0), "5");
    }

    #[test]
    fn parses_padded_values_exactly() {
        let parsed = parse_fixed("900.500000000000000000000000000000").expect("parse");
        assert_eq!(parsed, Decimal::new(9005, 1));
        assert_eq!(parse_fixed("42").expect("parse"), Decimal::new(42, 0));
        assert!(parse_fixed("not-a-number").is_err());
    }
}
