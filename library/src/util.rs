//! Prefix number scanning with C `strtol`/`strtod` semantics: leading spaces
//! are skipped, parsing stops at the first byte that can't extend the
//! number, and no digits at all reads as zero.

fn skip_spaces(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|b| *b != b' ').unwrap_or(s.len());
    &s[start..]
}

fn count_digits(s: &[u8]) -> usize {
    s.iter().take_while(|b| b.is_ascii_digit()).count()
}

pub fn parse_long(s: &str) -> i32 {
    let bytes = skip_spaces(s.as_bytes());
    let (negative, bytes) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    let magnitude = bytes.iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |total, b| (total * 10 + (b - b'0') as i64).min(i32::MAX as i64 + 1));
    let value = if negative { -magnitude } else { magnitude };
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Longest numeric prefix of `s` once leading spaces are skipped.
fn float_prefix(s: &str) -> &str {
    let bytes = s.as_bytes();
    let start = bytes.len() - skip_spaces(bytes).len();
    let mut end = start;
    if matches!(bytes.get(end), Some(b'-') | Some(b'+')) {
        end += 1;
    }
    let whole = count_digits(&bytes[end..]);
    end += whole;
    let mut fraction = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction = count_digits(&bytes[end + 1..]);
        if whole + fraction > 0 {
            end += 1 + fraction;
        }
    }
    if whole + fraction == 0 {
        return "";
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-') | Some(b'+')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }
    &s[start..end]
}

pub fn parse_float(s: &str) -> f32 {
    float_prefix(s).parse().unwrap_or(0.0)
}
