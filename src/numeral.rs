//! Chinese numeral ⇄ integer conversion for headings and filenames.

/// Single Chinese digit character → value 0–9.
fn cn_digit(c: char) -> Option<u32> {
    match c {
        '零' | '〇' => Some(0),
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

/// Parse a Chinese cardinal number (零–九十九) → integer.
///
/// Returns 0 for anything outside the table, including 百 and larger
/// magnitudes. Callers treat 0 as "could not parse" and pick their own
/// fallback.
pub fn to_int(s: &str) -> u32 {
    let chars: Vec<char> = s.trim().chars().collect();
    let value = match chars.as_slice() {
        ['十'] => Some(10),
        // 十D (11–19)
        ['十', d] => cn_digit(*d).filter(|&d| d > 0).map(|d| 10 + d),
        [c] => cn_digit(*c),
        // D十 (20, 30 … 90)
        [d, '十'] => cn_digit(*d).filter(|&d| d > 1).map(|d| d * 10),
        // D十D (21–99)
        [d1, '十', d2] => match (cn_digit(*d1), cn_digit(*d2)) {
            (Some(t), Some(u)) if t > 1 && u > 0 => Some(t * 10 + u),
            _ => None,
        },
        _ => None,
    };
    value.unwrap_or(0)
}

/// Integer → Chinese numeral for 1–12; decimal digits otherwise.
///
/// Only used to build part directory names, so the table stops at 十二.
pub fn to_numeral(n: u32) -> String {
    const TABLE: [&str; 12] = [
        "一", "二", "三", "四", "五", "六", "七", "八", "九", "十", "十一", "十二",
    ];
    match n {
        1..=12 => TABLE[n as usize - 1].to_string(),
        _ => n.to_string(),
    }
}

/// Number token from a heading or filename: Chinese numeral first, then
/// literal ASCII digits. `None` when neither reading works.
pub fn parse_heading_number(token: &str) -> Option<u32> {
    let token = token.trim();
    match to_int(token) {
        0 => token.parse::<u32>().ok().filter(|&n| n > 0),
        n => Some(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── to_int ───────────────────────────────────────────────────────

    #[test]
    fn test_to_int_basic_digits() {
        assert_eq!(to_int("一"), 1);
        assert_eq!(to_int("二"), 2);
        assert_eq!(to_int("两"), 2);
        assert_eq!(to_int("九"), 9);
        assert_eq!(to_int("零"), 0);
    }

    #[test]
    fn test_to_int_tens() {
        assert_eq!(to_int("十"), 10);
        assert_eq!(to_int("十一"), 11);
        assert_eq!(to_int("十九"), 19);
        assert_eq!(to_int("二十"), 20);
        assert_eq!(to_int("三十五"), 35);
        assert_eq!(to_int("九十九"), 99);
    }

    #[test]
    fn test_to_int_unrecognized_is_zero() {
        assert_eq!(to_int(""), 0);
        assert_eq!(to_int("百"), 0);
        assert_eq!(to_int("一百"), 0);
        assert_eq!(to_int("一百零一"), 0);
        assert_eq!(to_int("序"), 0);
        assert_eq!(to_int("12"), 0);
        // malformed compounds
        assert_eq!(to_int("十十"), 0);
        assert_eq!(to_int("一十"), 0);
        assert_eq!(to_int("二十零"), 0);
    }

    // ── to_numeral ───────────────────────────────────────────────────

    #[test]
    fn test_to_numeral_table_and_fallback() {
        assert_eq!(to_numeral(1), "一");
        assert_eq!(to_numeral(10), "十");
        assert_eq!(to_numeral(12), "十二");
        assert_eq!(to_numeral(13), "13");
        assert_eq!(to_numeral(0), "0");
    }

    #[test]
    fn test_round_trip_one_to_twelve() {
        for n in 1..=12 {
            assert_eq!(to_int(&to_numeral(n)), n, "round trip failed for {n}");
        }
    }

    // ── parse_heading_number ─────────────────────────────────────────

    #[test]
    fn test_parse_heading_number_falls_back_to_digits() {
        assert_eq!(parse_heading_number("十一"), Some(11));
        assert_eq!(parse_heading_number("135"), Some(135));
        assert_eq!(parse_heading_number(" 7 "), Some(7));
        assert_eq!(parse_heading_number("一百三十五"), None);
        assert_eq!(parse_heading_number("0"), None);
    }
}
