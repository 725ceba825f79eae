//! Connection-code grammar: turns a short address string into a
//! concrete transport target.

use crate::error::{SessionError, SessionResult};

/// A handful of tunnel providers whose public hostnames are TLS-terminated
/// upstream of the process, so `http://` addresses to them still need a
/// TLS client connection, and `/ws` is sometimes omitted entirely.
const WELL_KNOWN_TUNNEL_DOMAINS: &[&str] = &[
    "ngrok.io",
    "ngrok-free.app",
    "ngrok.app",
    "loca.lt",
    "serveo.net",
    "trycloudflare.com",
];

fn is_well_known_tunnel_domain(host: &str) -> bool {
    WELL_KNOWN_TUNNEL_DOMAINS
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Path component of the WebSocket URL, `/ws` or empty for tunnel
    /// domains that front the hub's socket directly at `/`.
    pub path: &'static str,
}

impl ConnectTarget {
    pub fn to_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

fn split_host_port(hostport: &str, default_port: Option<u16>) -> SessionResult<(String, u16)> {
    match hostport.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| SessionError::Transport(format!("bad port in connection code: {hostport}")))?;
            Ok((host.to_string(), port))
        }
        None => {
            let port = default_port
                .ok_or_else(|| SessionError::Transport(format!("connection code missing port: {hostport}")))?;
            Ok((hostport.to_string(), port))
        }
    }
}

/// Parse a connection code into a transport target, following the grammar:
/// `melq://host:port`, `https://host[:port]`, `http://host:port`,
/// `host:port`, or a bare domain containing a dot.
pub fn parse_connection_code(code: &str) -> SessionResult<ConnectTarget> {
    let code = code.trim();
    if let Some(rest) = code.strip_prefix("melq://") {
        let (host, port) = split_host_port(rest, None)?;
        return Ok(ConnectTarget { host, port, tls: false, path: "/ws" });
    }
    if let Some(rest) = code.strip_prefix("https://") {
        let (host, port) = split_host_port(rest, Some(443))?;
        let path = if is_well_known_tunnel_domain(&host) { "" } else { "/ws" };
        return Ok(ConnectTarget { host, port, tls: true, path });
    }
    if let Some(rest) = code.strip_prefix("http://") {
        let (host, port) = split_host_port(rest, None)?;
        let tls = is_well_known_tunnel_domain(&host);
        return Ok(ConnectTarget { host, port, tls, path: "/ws" });
    }
    if let Some((host, port_str)) = code.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok(ConnectTarget {
                host: host.to_string(),
                port,
                tls: false,
                path: "/ws",
            });
        }
    }
    if code.contains('.') {
        return Ok(ConnectTarget {
            host: code.to_string(),
            port: 443,
            tls: true,
            path: "/ws",
        });
    }
    Err(SessionError::Transport(format!("unrecognized connection code: {code}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_melq_scheme() {
        let t = parse_connection_code("melq://192.168.1.5:42045").unwrap();
        assert_eq!(t.host, "192.168.1.5");
        assert_eq!(t.port, 42045);
        assert!(!t.tls);
        assert_eq!(t.path, "/ws");
    }

    #[test]
    fn parses_https_with_default_port() {
        let t = parse_connection_code("https://hub.example.com").unwrap();
        assert_eq!(t.port, 443);
        assert!(t.tls);
        assert_eq!(t.path, "/ws");
    }

    #[test]
    fn https_to_tunnel_domain_omits_ws_path() {
        let t = parse_connection_code("https://abc123.loca.lt").unwrap();
        assert_eq!(t.path, "");
    }

    #[test]
    fn http_to_tunnel_domain_upgrades_to_tls() {
        let t = parse_connection_code("http://abc123.ngrok-free.app:443").unwrap();
        assert!(t.tls);
    }

    #[test]
    fn http_to_plain_host_stays_plain() {
        let t = parse_connection_code("http://192.168.1.5:42045").unwrap();
        assert!(!t.tls);
    }

    #[test]
    fn numeric_host_port_is_plain() {
        let t = parse_connection_code("192.168.1.5:42045").unwrap();
        assert!(!t.tls);
        assert_eq!(t.port, 42045);
    }

    #[test]
    fn bare_domain_with_dot_is_tls() {
        let t = parse_connection_code("hub.example.com").unwrap();
        assert!(t.tls);
        assert_eq!(t.port, 443);
    }

    #[test]
    fn bare_word_without_dot_or_port_is_rejected() {
        assert!(parse_connection_code("localhub").is_err());
    }
}
