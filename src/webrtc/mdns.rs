use webrtc::ice::mdns::MulticastDnsMode;

/// Environment variable selecting how ICE treats `.local` candidates
pub const MDNS_MODE_ENV: &str = "SMARTBOW_WEBRTC_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode_from_env() -> Option<MulticastDnsMode> {
    std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
}

/// Camera backends on the LAN often advertise `.local` candidates, so
/// resolve them but don't publish our own.
pub fn mdns_mode() -> MulticastDnsMode {
    mdns_mode_from_env().unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn default_mdns_host_name(session_id: &str) -> String {
    format!("{session_id}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mdns_mode() {
        assert_eq!(parse_mdns_mode("off"), Some(MulticastDnsMode::Disabled));
        assert_eq!(parse_mdns_mode(" Query-Only "), Some(MulticastDnsMode::QueryOnly));
        assert_eq!(parse_mdns_mode("1"), Some(MulticastDnsMode::QueryAndGather));
        assert_eq!(parse_mdns_mode(""), None);
        assert_eq!(parse_mdns_mode("sometimes"), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(mdns_mode_label(MulticastDnsMode::QueryOnly), "query_only");
        assert_eq!(default_mdns_host_name("abc"), "abc.local");
    }
}
