//! Kubernetes resource quantities (`250m`, `128Mi`, `1.5e3`) for metrics columns

/// An exact quantity as `numer / denom`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Quantity {
    numer: i128,
    denom: i128,
}

fn parse(input: &str) -> Option<Quantity> {
    let s = input.trim();
    let (negative, rest) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let number_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_end);

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if frac_part.contains('.') || (int_part.is_empty() && frac_part.is_empty()) {
        return None;
    }

    let mut numer: i128 = format!("{}{}", int_part, frac_part).parse().ok()?;
    let mut denom: i128 = 10i128.checked_pow(frac_part.len() as u32)?;

    match suffix {
        "" => {}
        "Ki" => numer = numer.checked_mul(1 << 10)?,
        "Mi" => numer = numer.checked_mul(1 << 20)?,
        "Gi" => numer = numer.checked_mul(1 << 30)?,
        "Ti" => numer = numer.checked_mul(1 << 40)?,
        "Pi" => numer = numer.checked_mul(1 << 50)?,
        "Ei" => numer = numer.checked_mul(1 << 60)?,
        "n" => denom = denom.checked_mul(1_000_000_000)?,
        "u" => denom = denom.checked_mul(1_000_000)?,
        "m" => denom = denom.checked_mul(1_000)?,
        "k" => numer = numer.checked_mul(1_000)?,
        "M" => numer = numer.checked_mul(1_000_000)?,
        "G" => numer = numer.checked_mul(10i128.pow(9))?,
        "T" => numer = numer.checked_mul(10i128.pow(12))?,
        "P" => numer = numer.checked_mul(10i128.pow(15))?,
        "E" => numer = numer.checked_mul(10i128.pow(18))?,
        exponent if exponent.starts_with(['e', 'E']) => {
            let exp: i32 = exponent[1..].parse().ok()?;
            let scale = 10i128.checked_pow(exp.unsigned_abs())?;
            if exp >= 0 {
                numer = numer.checked_mul(scale)?;
            } else {
                denom = denom.checked_mul(scale)?;
            }
        }
        _ => return None,
    }

    if negative {
        numer = -numer;
    }
    Some(Quantity { numer, denom })
}

/// Integer division rounding towards positive infinity; `b` must be positive
fn ceil_div(a: i128, b: i128) -> i128 {
    let q = a.div_euclid(b);
    if a.rem_euclid(b) != 0 { q + 1 } else { q }
}

/// Quantity in thousandths, rounded up
pub fn milli_value(input: &str) -> Option<i128> {
    let q = parse(input)?;
    Some(ceil_div(q.numer.checked_mul(1000)?, q.denom))
}

/// Quantity in whole units, rounded up
pub fn value(input: &str) -> Option<i128> {
    let q = parse(input)?;
    Some(ceil_div(q.numer, q.denom))
}

/// Render a CPU quantity as millicores, e.g. `250m`
pub fn format_cpu(input: &str) -> Option<String> {
    milli_value(input).map(|m| format!("{}m", m))
}

/// Render a memory quantity as whole mebibytes, e.g. `128Mi`
pub fn format_memory(input: &str) -> Option<String> {
    value(input).map(|v| format!("{}Mi", v / (1024 * 1024)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu() {
        assert_eq!(format_cpu("250m").as_deref(), Some("250m"));
        assert_eq!(format_cpu("1").as_deref(), Some("1000m"));
        assert_eq!(format_cpu("0.1").as_deref(), Some("100m"));
        assert_eq!(format_cpu("1500000n").as_deref(), Some("2m"));
        assert_eq!(format_cpu("3158u").as_deref(), Some("4m"));
    }

    #[test]
    fn test_memory() {
        assert_eq!(format_memory("128Mi").as_deref(), Some("128Mi"));
        assert_eq!(format_memory("1Gi").as_deref(), Some("1024Mi"));
        assert_eq!(format_memory("134217728").as_deref(), Some("128Mi"));
        assert_eq!(format_memory("20628Ki").as_deref(), Some("20Mi"));
        assert_eq!(format_memory("1e3").as_deref(), Some("0Mi"));
    }

    #[test]
    fn test_exponent_and_decimal_suffixes() {
        assert_eq!(value("1.5k"), Some(1500));
        assert_eq!(value("2E2"), Some(200));
        assert_eq!(milli_value("5e-3"), Some(5));
        assert_eq!(value("1M"), Some(1_000_000));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(value(""), None);
        assert_eq!(value("abc"), None);
        assert_eq!(value("1.2.3"), None);
        assert_eq!(value("12Qi"), None);
        assert_eq!(format_cpu("."), None);
    }
}
