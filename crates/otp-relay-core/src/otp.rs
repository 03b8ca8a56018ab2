//! OTP extraction from SMS bodies.

use std::sync::OnceLock;

use regex::Regex;

/// Patterns tried in order, most specific first. Capture group 1 is the code.
const OTP_PATTERNS: &[&str] = &[
    r"(?i)\bcode[:\s]+(\d{4,8})\b",
    r"(?i)\bOTP[:\s]+(\d{4,8})\b",
    r"(?i)verification\s*code[:\s]+(\d{4,8})\b",
    r"(?i)your\s+code\s+is[:\s]+(\d{4,8})\b",
    r"(?i)\bPIN[:\s]+(\d{4,8})\b",
    r"(?i)\b(?:otp|one[-\s]?time|verification|code|pin)[:\s]*(\d{4,8})",
    r"(?i)Telegram(?:[:\s]+code)?[:\s]+(\d{4,8})\b",
    r"(?i)WhatsApp(?:[:\s]+code)?[:\s]+(\d{4,8})\b",
    r"(?i)^(\d{4,8})\s+is\s+your",
];

const INDICATOR_PATTERNS: &[&str] = &[
    r"(?i)\bcode\b",
    r"(?i)\bOTP\b",
    r"(?i)\bverification\b",
    r"(?i)\bPIN\b",
    r"(?i)\bpassword\b",
    r"(?i)\bTelegram\b",
    r"(?i)\bWhatsApp\b",
    r"\d{4,8}",
];

fn compiled(patterns: &'static [&'static str], cell: &'static OnceLock<Vec<Regex>>) -> &'static [Regex] {
    cell.get_or_init(|| {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("valid regex"))
            .collect()
    })
}

fn otp_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(OTP_PATTERNS, &CELL)
}

fn indicator_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(INDICATOR_PATTERNS, &CELL)
}

fn alnum_token() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"[A-Za-z0-9]+").expect("valid regex"))
}

/// Collapse newlines and runs of whitespace into single spaces.
fn normalize(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the OTP code from a message body, if any.
pub fn extract_otp(message: &str) -> Option<String> {
    let normalized = normalize(message);
    if normalized.is_empty() {
        return None;
    }

    for re in otp_patterns() {
        if let Some(code) = re.captures(&normalized).and_then(|c| c.get(1)) {
            return Some(code.as_str().to_string());
        }
    }

    // Fallback: a standalone 4-8 digit token not glued to letters or other digits,
    // so long phone numbers and alphanumeric ids are skipped.
    alnum_token()
        .find_iter(&normalized)
        .map(|m| m.as_str())
        .find(|tok| (4..=8).contains(&tok.len()) && tok.bytes().all(|b| b.is_ascii_digit()))
        .map(|tok| tok.to_string())
}

/// Cheap pre-filter: does the body look like it might carry a code?
pub fn has_otp_indicators(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    indicator_patterns().iter().any(|re| re.is_match(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_code_is_extracted_across_newlines() {
        let body = "Telegram code 85191\n\nYou can also tap on this link to log in:\nhttps://t.me/login/85191";
        assert_eq!(extract_otp(body).as_deref(), Some("85191"));
    }

    #[test]
    fn labelled_codes_win_over_earlier_numbers() {
        assert_eq!(
            extract_otp("Order 99887766 shipped. Your OTP: 4321").as_deref(),
            Some("4321")
        );
        assert_eq!(extract_otp("PIN 0042 for card").as_deref(), Some("0042"));
        assert_eq!(
            extract_otp("123456 is your Instagram code").as_deref(),
            Some("123456")
        );
    }

    #[test]
    fn whatsapp_style_code_is_extracted() {
        assert_eq!(
            extract_otp("WhatsApp: 774411 do not share").as_deref(),
            Some("774411")
        );
    }

    #[test]
    fn fallback_skips_long_numbers_and_alphanumeric_tokens() {
        assert_eq!(
            extract_otp("Call 5551234567890 or ref AB1234 then use 9090").as_deref(),
            Some("9090")
        );
        assert_eq!(extract_otp("no digits here"), None);
        assert_eq!(extract_otp("   "), None);
    }

    #[test]
    fn indicators_detect_keywords_and_digit_runs() {
        assert!(has_otp_indicators("your verification link"));
        assert!(has_otp_indicators("1234"));
        assert!(!has_otp_indicators("hello there"));
        assert!(!has_otp_indicators(""));
        for body in ["Telegram code 85191", "4821 is your code", "ref 9090 today"] {
            assert!(extract_otp(body).is_some());
            assert!(has_otp_indicators(body), "{body}");
        }
    }
}
