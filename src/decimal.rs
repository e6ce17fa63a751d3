//! Venue decimal/symbol helpers shared by the exchange adapter boundary.

const FIXED_SCALE_THRESHOLD: f64 = 1e9;
const FIXED_SCALE: f64 = 1_000_000_000.0;

/// Detects venue fixed-point scaling and decodes it in one place.
///
/// Some venues wire integers scaled by 1e9 instead of floats; anything
/// whose magnitude looks like that encoding gets divided back down.
pub fn decode_fixed_point(x: f64) -> f64 {
    if x.abs() >= FIXED_SCALE_THRESHOLD {
        x / FIXED_SCALE
    } else {
        x
    }
}

/// Uppercases and canonicalizes a perp symbol's suffix so adapter lookups
/// and reconciler comparisons agree regardless of venue casing/suffix style.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    for suffix in ["-PERP", "_PERP"] {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            return format!("{stripped}_Perp");
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fixed_point_scales_large_magnitudes() {
        assert_eq!(decode_fixed_point(1_500_000_000.0), 1.5);
        assert_eq!(decode_fixed_point(-2_000_000_000.0), -2.0);
    }

    #[test]
    fn test_decode_fixed_point_leaves_small_values_alone() {
        assert_eq!(decode_fixed_point(42.5), 42.5);
        assert_eq!(decode_fixed_point(0.0), 0.0);
    }

    #[test]
    fn test_normalize_symbol_suffix_variants() {
        assert_eq!(normalize_symbol("btc-perp"), "BTC_Perp");
        assert_eq!(normalize_symbol("ETH_PERP"), "ETH_Perp");
        assert_eq!(normalize_symbol("sol_Perp"), "SOL_Perp");
    }

    #[test]
    fn test_normalize_symbol_case_insensitive_compare() {
        assert_eq!(normalize_symbol("btc-perp"), normalize_symbol("BTC_PERP"));
    }
}
