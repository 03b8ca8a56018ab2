//! Telegram HTML rendering for OTP notifications.

use crate::{
    domain::OtpEvent,
    messaging::types::{InlineButton, InlineKeyboard},
    phone::mask_phone_number,
    platform::{detect_platform, Platform},
    settings::PresentationSettings,
};

/// Callback-data prefix of the OTP button; the code follows it.
pub const OTP_CALLBACK_PREFIX: &str = "otp:";

/// Longest raw body quoted in an unknown-platform notification.
const MAX_QUOTED_BODY_CHARS: usize = 3000;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Ready-to-send notification: HTML body plus its inline keyboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub platform: Platform,
    pub html: String,
    pub keyboard: InlineKeyboard,
}

pub fn render_notification(event: &OtpEvent, settings: &PresentationSettings) -> Notification {
    let platform = detect_platform(&event.raw_body);
    let country = event.country_code.as_deref().unwrap_or("XX");
    let masked = mask_phone_number(&event.phone);
    let footer = footer_html(settings);

    let html = if platform.is_known() {
        format!(
            "{} #{} #{} {}\n\n\n{}",
            event.country_flag,
            country,
            platform.short(),
            masked,
            footer
        )
    } else {
        format!(
            "{} #{} Others {}\n\n<b>Message:</b>\n<pre>{}</pre>\n\n\n{}",
            event.country_flag,
            country,
            masked,
            escape_html(&truncate_chars(&event.raw_body, MAX_QUOTED_BODY_CHARS)),
            footer
        )
    };

    let links = vec![
        InlineButton::url(&settings.number_button_text, &settings.number_button_url),
        InlineButton::url(&settings.backup_button_text, &settings.backup_button_url),
    ];
    let mut keyboard = InlineKeyboard::default();
    if platform.is_known() {
        keyboard = keyboard.row(vec![InlineButton::callback(
            event.otp.clone(),
            otp_callback_data(&event.otp),
        )]);
    }
    let keyboard = keyboard.row(links);

    Notification {
        platform,
        html,
        keyboard,
    }
}

/// Plain-HTML fallback for messengers without inline keyboards.
pub fn inline_otp_html(notification: &Notification, otp: &str) -> String {
    if notification.platform.is_known() {
        format!("<code>{}</code>\n{}", escape_html(otp), notification.html)
    } else {
        notification.html.clone()
    }
}

fn footer_html(settings: &PresentationSettings) -> String {
    format!(
        "<b><a href=\"{}\">{}</a></b>",
        escape_html(&settings.footer_link),
        escape_html(&settings.footer_text)
    )
}

pub fn otp_callback_data(otp: &str) -> String {
    format!("{OTP_CALLBACK_PREFIX}{otp}")
}

pub fn parse_otp_callback(data: &str) -> Option<&str> {
    data.strip_prefix(OTP_CALLBACK_PREFIX)
        .filter(|otp| !otp.is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
