//! The resolver capability (spec.md §6): turns `host`/`port` strings into
//! IPs and a numeric port. Treated as an external collaborator — this
//! module only defines the trait boundary and a default implementation
//! backed by the OS resolver via tokio, so [`crate::schedialer::Schedialer`]
//! has something to use out of the box.

use std::net::IpAddr;

use async_trait::async_trait;

/// DNS/service resolution capability consumed by the dial orchestrator.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves `host` to one or more IPs. Called only when `host` does not
    /// already parse as a literal IP address.
    async fn lookup_ip(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;

    /// Resolves a service/port name to a numeric port for `network`
    /// (`"tcp"` or `"udp"`). Numeric strings always resolve to themselves.
    async fn lookup_port(&self, network: &str, port: &str) -> std::io::Result<u16>;
}

/// Default resolver, backed by the OS's resolver via `tokio::net::lookup_host`
/// and the standard `/etc/services`-style port lookup via `getservbyname`
/// semantics (approximated here by parsing numeric ports, since service-name
/// ports are rarely used in the proxy-dialing niche this crate serves).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        // tokio::net::lookup_host requires a socket address, so pair the
        // host with a throwaway port purely to drive resolution.
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        if ips.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for host {host}"),
            ));
        }
        Ok(ips)
    }

    async fn lookup_port(&self, _network: &str, port: &str) -> std::io::Result<u16> {
        port.parse::<u16>().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid port {port}: {e}"),
            )
        })
    }
}
