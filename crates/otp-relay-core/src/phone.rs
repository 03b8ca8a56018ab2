//! Phone number display helpers: country lookup by calling code, flag emoji, masking.

const GLOBE: &str = "🌐";

/// Calling-code prefixes to ISO 3166-1 alpha-2. Longest prefix wins.
const CALLING_CODES: &[(&str, &str)] = &[
    ("1", "US"),
    ("7", "RU"),
    ("20", "EG"),
    ("27", "ZA"),
    ("30", "GR"),
    ("31", "NL"),
    ("32", "BE"),
    ("33", "FR"),
    ("34", "ES"),
    ("36", "HU"),
    ("39", "IT"),
    ("40", "RO"),
    ("41", "CH"),
    ("43", "AT"),
    ("44", "GB"),
    ("45", "DK"),
    ("46", "SE"),
    ("47", "NO"),
    ("48", "PL"),
    ("49", "DE"),
    ("51", "PE"),
    ("52", "MX"),
    ("53", "CU"),
    ("54", "AR"),
    ("55", "BR"),
    ("56", "CL"),
    ("57", "CO"),
    ("58", "VE"),
    ("60", "MY"),
    ("61", "AU"),
    ("62", "ID"),
    ("63", "PH"),
    ("64", "NZ"),
    ("65", "SG"),
    ("66", "TH"),
    ("81", "JP"),
    ("82", "KR"),
    ("84", "VN"),
    ("86", "CN"),
    ("90", "TR"),
    ("91", "IN"),
    ("92", "PK"),
    ("93", "AF"),
    ("94", "LK"),
    ("95", "MM"),
    ("98", "IR"),
    ("211", "SS"),
    ("212", "MA"),
    ("213", "DZ"),
    ("216", "TN"),
    ("218", "LY"),
    ("220", "GM"),
    ("221", "SN"),
    ("223", "ML"),
    ("224", "GN"),
    ("225", "CI"),
    ("226", "BF"),
    ("227", "NE"),
    ("228", "TG"),
    ("229", "BJ"),
    ("231", "LR"),
    ("232", "SL"),
    ("233", "GH"),
    ("234", "NG"),
    ("235", "TD"),
    ("236", "CF"),
    ("237", "CM"),
    ("243", "CD"),
    ("244", "AO"),
    ("249", "SD"),
    ("251", "ET"),
    ("254", "KE"),
    ("255", "TZ"),
    ("256", "UG"),
    ("260", "ZM"),
    ("261", "MG"),
    ("263", "ZW"),
    ("351", "PT"),
    ("353", "IE"),
    ("358", "FI"),
    ("359", "BG"),
    ("370", "LT"),
    ("371", "LV"),
    ("372", "EE"),
    ("373", "MD"),
    ("374", "AM"),
    ("375", "BY"),
    ("380", "UA"),
    ("381", "RS"),
    ("385", "HR"),
    ("420", "CZ"),
    ("421", "SK"),
    ("502", "GT"),
    ("503", "SV"),
    ("504", "HN"),
    ("505", "NI"),
    ("506", "CR"),
    ("507", "PA"),
    ("509", "HT"),
    ("591", "BO"),
    ("593", "EC"),
    ("595", "PY"),
    ("598", "UY"),
    ("855", "KH"),
    ("856", "LA"),
    ("880", "BD"),
    ("886", "TW"),
    ("960", "MV"),
    ("961", "LB"),
    ("962", "JO"),
    ("963", "SY"),
    ("964", "IQ"),
    ("965", "KW"),
    ("966", "SA"),
    ("967", "YE"),
    ("968", "OM"),
    ("970", "PS"),
    ("971", "AE"),
    ("972", "IL"),
    ("973", "BH"),
    ("974", "QA"),
    ("976", "MN"),
    ("977", "NP"),
    ("992", "TJ"),
    ("993", "TM"),
    ("994", "AZ"),
    ("995", "GE"),
    ("996", "KG"),
    ("998", "UZ"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhoneInfo {
    /// `+` and the digits of the number.
    pub formatted: String,
    pub flag: String,
    pub country_code: Option<String>,
}

/// Country for a digits-only international number, by longest calling-code prefix.
pub fn country_for_number(digits: &str) -> Option<&'static str> {
    CALLING_CODES
        .iter()
        .filter(|(prefix, _)| digits.starts_with(prefix) && digits.len() > prefix.len())
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, iso)| *iso)
}

/// Regional-indicator flag for a two-letter country code; globe otherwise.
pub fn country_code_to_flag(code: &str) -> String {
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return GLOBE.to_string();
    }
    code.to_ascii_uppercase()
        .bytes()
        .filter_map(|b| char::from_u32(0x1F1E6 + u32::from(b - b'A')))
        .collect()
}

pub fn format_phone_with_flag(phone: &str) -> PhoneInfo {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let formatted = format!("+{digits}");
    match country_for_number(&digits) {
        Some(iso) => PhoneInfo {
            formatted,
            flag: country_code_to_flag(iso),
            country_code: Some(iso.to_string()),
        },
        None => PhoneInfo {
            formatted,
            flag: GLOBE.to_string(),
            country_code: None,
        },
    }
}

/// Mask the middle of a number: first 4 and last 3 digits stay visible.
pub fn mask_phone_number(phone: &str) -> String {
    const VISIBLE_PREFIX: usize = 4;
    const VISIBLE_SUFFIX: usize = 3;

    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 2 {
        return phone.to_string();
    }
    if digits.len() <= VISIBLE_PREFIX + VISIBLE_SUFFIX {
        return format!("+{}...{}", digits[0], digits[digits.len() - 1]);
    }

    let start: String = digits[..VISIBLE_PREFIX].iter().collect();
    let end: String = digits[digits.len() - VISIBLE_SUFFIX..].iter().collect();
    let middle = "X".repeat(digits.len() - VISIBLE_PREFIX - VISIBLE_SUFFIX);
    format!("+{start}{middle}{end}")
}
