//! Endpoint strings: `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6
//! literal.

use std::fmt;

/// Port used when an address does not name one.
pub const DEFAULT_PORT: u16 = 34712;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses an endpoint, returning `None` for anything malformed.
///
/// A bare IPv6 literal is taken whole (no port suffix can be split off it
/// unambiguously); use brackets to give it a port.
pub fn parse_address(input: &str, default_port: u16) -> Option<ServerAddress> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        if host.is_empty() {
            return None;
        }
        let port = match tail {
            "" => default_port,
            tail => parse_port(tail.strip_prefix(':')?)?,
        };
        return Some(ServerAddress::new(host, port));
    }

    match input.matches(':').count() {
        0 => Some(ServerAddress::new(input, default_port)),
        1 => {
            let (host, port) = input.split_once(':')?;
            if host.is_empty() {
                return None;
            }
            Some(ServerAddress::new(host, parse_port(port)?))
        }
        _ => Some(ServerAddress::new(input, default_port)),
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(
            parse_address("127.0.0.1", 22),
            parse_address("127.0.0.1:22", DEFAULT_PORT)
        );
        assert_eq!(
            parse_address("localhost", DEFAULT_PORT),
            Some(ServerAddress::new("localhost", DEFAULT_PORT))
        );
    }

    #[test]
    fn test_ipv6() {
        assert_eq!(
            parse_address("[::1]:80", DEFAULT_PORT),
            Some(ServerAddress::new("::1", 80))
        );
        assert_eq!(
            parse_address("[::1]", 22),
            Some(ServerAddress::new("::1", 22))
        );
        assert_eq!(
            parse_address("fe80::1", 22),
            Some(ServerAddress::new("fe80::1", 22))
        );
        assert_eq!(parse_address("[::1]80", 22), None);
        assert_eq!(parse_address("[]:80", 22), None);
    }

    #[test]
    fn test_bad_ports() {
        assert_eq!(parse_address("127.0.0.1:-72", DEFAULT_PORT), None);
        assert_eq!(parse_address("127.0.0.1:100000000", DEFAULT_PORT), None);
        assert_eq!(parse_address("127.0.0.1:lmao", DEFAULT_PORT), None);
        assert_eq!(parse_address("127.0.0.1:", DEFAULT_PORT), None);
        assert_eq!(parse_address("[::1]:+80", DEFAULT_PORT), None);
        assert_eq!(parse_address(":80", DEFAULT_PORT), None);
        assert_eq!(parse_address("", DEFAULT_PORT), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerAddress::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(ServerAddress::new("example.com", 80).to_string(), "example.com:80");
    }
}
