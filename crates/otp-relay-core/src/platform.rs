//! Which service an OTP message came from, judged by keywords in the body.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    WhatsApp,
    Telegram,
    Facebook,
    Unknown,
}

impl Platform {
    pub fn icon(self) -> &'static str {
        match self {
            Platform::Telegram => "✈️",
            Platform::Facebook => "📘",
            Platform::WhatsApp => "📱",
            Platform::Unknown => "❓",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Telegram => "Telegram",
            Platform::Facebook => "Facebook",
            Platform::WhatsApp => "WhatsApp",
            Platform::Unknown => "Others",
        }
    }

    /// Hashtag-friendly short tag.
    pub fn short(self) -> &'static str {
        match self {
            Platform::Telegram => "TG",
            Platform::Facebook => "FB",
            Platform::WhatsApp => "WA",
            Platform::Unknown => "Others",
        }
    }

    pub fn is_known(self) -> bool {
        self != Platform::Unknown
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Platform::Telegram => &["telegram", "login code", "t.me/login", "tg://login"],
            Platform::Facebook => &["facebook", "meta", "fb-", "fb code"],
            Platform::WhatsApp => &["whatsapp", "whats app", "wa.me"],
            Platform::Unknown => &[],
        }
    }
}

/// WhatsApp is checked first: Meta sends WhatsApp codes that also mention Facebook.
const DETECTION_ORDER: [Platform; 3] = [Platform::WhatsApp, Platform::Telegram, Platform::Facebook];

pub fn detect_platform(message: &str) -> Platform {
    let lower = message.to_lowercase();
    DETECTION_ORDER
        .into_iter()
        .find(|p| p.keywords().iter().any(|kw| lower.contains(kw)))
        .unwrap_or(Platform::Unknown)
}
