use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SCORE_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-?\d+(?:[.,]\d+)?)(?:\s*/\s*(\d+(?:[.,]\d+)?))?").unwrap()
});

/// Maps a raw model score onto 0..=100.
///
/// Values in `(0, 10]` are read as a ten-point scale and multiplied by ten,
/// values in `(10, 100]` are rounded, anything above 100 clamps to 100 and
/// non-positive or non-finite values become 0.
pub fn normalize_score(raw: f64) -> u8 {
    if !raw.is_finite() || raw <= 0.0 {
        0
    } else if raw <= 10.0 {
        (raw * 10.0).round() as u8
    } else if raw <= 100.0 {
        raw.round() as u8
    } else {
        100
    }
}

/// Reads the first number in `text`, honouring an `x/10` or `x/100`
/// denominator. Other denominators are rescaled to a percentage first.
pub fn parse_score_text(text: &str) -> Option<f64> {
    let caps = SCORE_TEXT.captures(text)?;
    let value = parse_number(caps.get(1)?.as_str())?;

    match caps.get(2).and_then(|d| parse_number(d.as_str())) {
        Some(denominator) if denominator > 0.0 && denominator != 10.0 && denominator != 100.0 => {
            Some(value / denominator * 100.0)
        }
        _ => Some(value),
    }
}

pub fn score_from_text(text: &str) -> u8 {
    parse_score_text(text).map(normalize_score).unwrap_or(0)
}

/// Score carried by a JSON value: numbers directly, strings such as
/// `"8/10"` through [`parse_score_text`]. Anything else has no score.
pub fn raw_score_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_score_text(s),
        _ => None,
    }
}

pub fn score_from_value(value: &Value) -> u8 {
    raw_score_from_value(value).map(normalize_score).unwrap_or(0)
}

pub fn mean_score<I: IntoIterator<Item = u8>>(scores: I) -> Option<u8> {
    let (sum, count) = scores
        .into_iter()
        .fold((0u32, 0u32), |(sum, count), s| (sum + s as u32, count + 1));
    if count == 0 {
        None
    } else {
        Some((sum as f64 / count as f64).round() as u8)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ten_point_and_percentage_scales_agree() {
        assert_eq!(normalize_score(8.0), 80);
        assert_eq!(normalize_score(80.0), 80);
        assert_eq!(normalize_score(7.5), 75);
        assert_eq!(normalize_score(10.0), 100);
    }

    #[test]
    fn out_of_range_values_clamp() {
        assert_eq!(normalize_score(0.0), 0);
        assert_eq!(normalize_score(-3.0), 0);
        assert_eq!(normalize_score(150.0), 100);
        assert_eq!(normalize_score(f64::NAN), 0);
        assert_eq!(normalize_score(f64::INFINITY), 0);
    }

    #[test]
    fn normalization_is_idempotent_outside_the_ten_point_band() {
        // Results 1..=10 are themselves ten-point inputs; every other result is a fixed point.
        let mut x = -5.0;
        while x <= 200.0 {
            let once = normalize_score(x);
            if once == 0 || once > 10 {
                assert_eq!(normalize_score(once as f64), once, "input {}", x);
            }
            x += 0.25;
        }
    }

    #[test]
    fn parses_fraction_text() {
        assert_eq!(score_from_text("8/10"), 80);
        assert_eq!(score_from_text("Nota: 7,5 / 10"), 75);
        assert_eq!(score_from_text("85/100"), 85);
        assert_eq!(score_from_text("4/5"), 80);
        assert_eq!(score_from_text("no score here"), 0);
    }

    #[test]
    fn reads_scores_from_json_values() {
        assert_eq!(score_from_value(&json!(9)), 90);
        assert_eq!(score_from_value(&json!("6/10")), 60);
        assert_eq!(score_from_value(&json!(72.4)), 72);
        assert_eq!(score_from_value(&json!(null)), 0);
        assert_eq!(score_from_value(&json!(true)), 0);
    }

    #[test]
    fn mean_rounds_half_up() {
        assert_eq!(mean_score([70, 50]), Some(60));
        assert_eq!(mean_score([70, 55]), Some(63));
        assert_eq!(mean_score(Vec::new()), None);
    }
}
