use crate::Result;

/// Initialize tracing for the relay.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` (DEBUG/INFO/WARN/ERROR) is
/// applied to the workspace crates and everything else stays at `warn`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level_from_env(std::env::var("LOG_LEVEL").ok().as_deref());
        EnvFilter::new(format!(
            "warn,otp_relay={level},otp_relay_core={level},otp_relay_http={level},otp_relay_telegram={level},{service_name}={level}"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("logging init failed: {e}")))?;

    Ok(())
}

fn level_from_env(raw: Option<&str>) -> &'static str {
    match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
        Some("DEBUG") => "debug",
        Some("WARN") => "warn",
        Some("ERROR") => "error",
        Some("TRACE") => "trace",
        _ => "info",
    }
}

/// Mask an OTP for log output: keep the first two characters.
pub fn mask_otp(otp: &str) -> String {
    let len = otp.chars().count();
    if len <= 2 {
        return "***".to_string();
    }
    let head: String = otp.chars().take(2).collect();
    format!("{head}{}", "*".repeat(len - 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_known_names_and_defaults_to_info() {
        assert_eq!(level_from_env(Some("debug")), "debug");
        assert_eq!(level_from_env(Some(" WARN ")), "warn");
        assert_eq!(level_from_env(Some("verbose")), "info");
        assert_eq!(level_from_env(None), "info");
    }

    #[test]
    fn otp_mask_keeps_two_leading_chars() {
        assert_eq!(mask_otp("123456"), "12****");
        assert_eq!(mask_otp("12"), "***");
    }
}
