//! Parsing of monetary amounts written with either decimal convention

use bigdecimal::BigDecimal;
use std::str::FromStr;
use tracing::debug;

const CURRENCY_TOKENS: &[&str] = &["EUR", "USD", "GBP", "€", "$", "£"];

/// Parse an amount such as `1.234,56`, `1,234.56` or `€ 1.000.000,00`
///
/// When both separators appear, the one written last is the decimal
/// separator. A lone comma is decimal only when at most two digits follow it.
/// Repeated dots without a comma are thousands separators.
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    for token in CURRENCY_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    if cleaned.is_empty() {
        return None;
    }

    let normalized = normalize_separators(&cleaned);
    match BigDecimal::from_str(&normalized) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(value = %raw, error = %e, "Unparseable amount");
            None
        },
    }
}

fn normalize_separators(value: &str) -> String {
    match (value.rfind(','), value.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => value.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => value.replace(',', ""),
        (Some(comma), None) => {
            let decimals = value.len() - comma - 1;
            if value.matches(',').count() == 1 && decimals <= 2 {
                value.replace(',', ".")
            } else {
                value.replace(',', "")
            }
        },
        (None, Some(_)) if value.matches('.').count() > 1 => value.replace('.', ""),
        _ => value.to_string(),
    }
}
