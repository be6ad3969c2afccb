use regex::Regex;
use std::sync::OnceLock;

fn ipv4_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}").ok())
        .as_ref()
}

/// Whether `addr` starts with a dotted-quad IPv4 literal (port allowed).
pub fn is_ipv4(addr: &str) -> bool {
    ipv4_pattern().map_or(false, |re| re.is_match(addr))
}

/// Pick the address to reconnect a peer on: the first IPv4 address, else the
/// first advertised one.
pub fn pick_reconnect_address(addresses: &[String]) -> Option<&str> {
    addresses
        .iter()
        .find(|a| is_ipv4(a))
        .or_else(|| addresses.iter().find(|a| !a.is_empty()))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_ipv4() {
        assert!(is_ipv4("1.2.3.4:9735"));
        assert!(is_ipv4("203.0.113.10"));
        assert!(!is_ipv4("abcdefgh.onion:9735"));
        assert!(!is_ipv4("[2001:db8::1]:9735"));
        assert!(!is_ipv4("node.example.com:9735"));
    }

    #[test]
    fn test_prefers_ipv4() {
        let list = addrs(&["xyz.onion:9735", "[2001:db8::1]:9735", "1.2.3.4:9735"]);
        assert_eq!(pick_reconnect_address(&list), Some("1.2.3.4:9735"));
    }

    #[test]
    fn test_falls_back_to_first() {
        let list = addrs(&["xyz.onion:9735", "[2001:db8::1]:9735"]);
        assert_eq!(pick_reconnect_address(&list), Some("xyz.onion:9735"));
    }

    #[test]
    fn test_no_addresses() {
        assert_eq!(pick_reconnect_address(&[]), None);
        assert_eq!(pick_reconnect_address(&addrs(&[""])), None);
    }
}
