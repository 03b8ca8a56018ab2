use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// One row of the dashboard's SMS table.
///
/// `timestamp` is dashboard-local `YYYY-MM-DD HH:MM:SS`, which orders
/// lexicographically the same way it orders in time.
#[derive(Clone, Debug, PartialEq)]
pub struct RawMessage {
    pub timestamp: String,
    pub country: String,
    pub phone: String,
    pub sender: String,
    pub body: String,
    pub symbol: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Structured OTP notification handed to the notifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpEvent {
    pub otp: String,
    /// `+` followed by the digits of the receiving number.
    pub phone: String,
    pub country_flag: String,
    pub country_code: Option<String>,
    pub timestamp: String,
    pub raw_body: String,
}
