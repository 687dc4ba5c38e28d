//! Display formatting for money and percentages (Colombian pesos).

/// `$ 51.000`; pesos have no minor unit on receipts.
pub fn format_cop(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-$ {grouped}")
    } else {
        format!("$ {grouped}")
    }
}

/// Rounds to the nearest peso.
pub fn format_cop_f64(amount: f64) -> String {
    if !amount.is_finite() {
        return "-".to_string();
    }
    format_cop(amount.round() as i64)
}

pub fn format_percent(value: f64) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    format!("{value:.1}%")
}

/// Relative change from `previous` to `current` in percent. `None` when
/// there is no baseline.
pub fn pct_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - previous) / previous.abs() * 100.0)
}

/// `+12.5%`, `-3.0%`, or `n/a` without a baseline.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) if d > 0.0 => format!("+{d:.1}%"),
        Some(d) => format!("{d:.1}%"),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cop_grouping() {
        assert_eq!(format_cop(0), "$ 0");
        assert_eq!(format_cop(950), "$ 950");
        assert_eq!(format_cop(51_000), "$ 51.000");
        assert_eq!(format_cop(1_234_567), "$ 1.234.567");
        assert_eq!(format_cop(-1_500), "-$ 1.500");
        assert_eq!(format_cop_f64(1999.6), "$ 2.000");
        assert_eq!(format_cop_f64(f64::NAN), "-");
    }

    #[test]
    fn percentage_delta() {
        assert_eq!(pct_change(120.0, 100.0), Some(20.0));
        assert_eq!(pct_change(50.0, 100.0), Some(-50.0));
        assert_eq!(pct_change(10.0, 0.0), None);
        assert_eq!(format_delta(pct_change(120.0, 100.0)), "+20.0%");
        assert_eq!(format_delta(pct_change(50.0, 100.0)), "-50.0%");
        assert_eq!(format_delta(None), "n/a");
        assert_eq!(format_percent(33.333), "33.3%");
    }
}
