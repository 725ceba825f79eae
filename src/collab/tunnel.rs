//! Tunnel collaborator: given `(local_port, preferred_method,
//! optional_custom_domain)`, return `(public_url, connection_code, method,
//! requires_port_forwarding?)`. The core doesn't care how the URL is
//! obtained — spawning `ngrok`/`localtunnel`/`serveo` processes is outer
//! surface left to a real CLI distribution, not this crate.

use crate::error::SessionResult;

pub struct TunnelInfo {
    pub public_url: String,
    pub connection_code: String,
    pub method: String,
    pub requires_port_forwarding: bool,
}

pub trait Tunnel: Send + Sync {
    fn establish(&self, local_port: u16, preferred_method: &str, custom_domain: Option<&str>) -> SessionResult<TunnelInfo>;
}

/// The one tunnel method that needs no external service: the operator
/// forwards the port themselves (router config, cloud security group, ...)
/// and supplies the reachable host.
pub struct ManualTunnel;

impl Tunnel for ManualTunnel {
    fn establish(&self, local_port: u16, _preferred_method: &str, custom_domain: Option<&str>) -> SessionResult<TunnelInfo> {
        let host = custom_domain.unwrap_or("<your-public-ip-or-domain>");
        let connection_code = format!("melq://{host}:{local_port}");
        Ok(TunnelInfo {
            public_url: connection_code.clone(),
            connection_code,
            method: "manual".to_string(),
            requires_port_forwarding: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_tunnel_builds_a_melq_connection_code() {
        let info = ManualTunnel.establish(42045, "manual", Some("example.com")).unwrap();
        assert_eq!(info.connection_code, "melq://example.com:42045");
        assert!(info.requires_port_forwarding);
    }
}
