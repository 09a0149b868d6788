//! Broker address handling for the dashboard channel.
//!
//! Accepted address forms:
//! - `host:port`
//! - `mqtt://host:port` or `tcp://host:port` (plain TCP)
//! - `mqtts://host:port` or `ssl://host:port` (TLS)
//! - `[ipv6]:port`, with or without a scheme
//!
//! Brokers must be on loopback unless remote access is explicitly allowed.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::net::IpAddr;
use std::path::Path;

use crate::config::BroadcastSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

/// Parse a broker address. `force_tls` enables TLS for schemeless or
/// plain-scheme addresses.
pub fn parse_broker_addr(addr: &str, force_tls: bool) -> Result<BrokerEndpoint> {
    let trimmed = addr.trim();
    let (use_tls, rest) = match trimmed.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => (force_tls, rest),
        Some(("mqtts" | "ssl", rest)) => (true, rest),
        Some((scheme, _)) => return Err(anyhow!("unsupported broker scheme '{}'", scheme)),
        None => (force_tls, trimmed),
    };

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated IPv6 host in broker address {}", addr))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("broker address {} has no port", addr))?;
        (host, port)
    } else {
        rest.rsplit_once(':')
            .ok_or_else(|| anyhow!("broker address {} has no port", addr))?
    };
    if host.is_empty() {
        return Err(anyhow!("broker address {} has no host", addr));
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in broker address {}", addr))?;

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        use_tls,
    })
}

/// Refuse non-loopback brokers unless `allow_remote` is set.
pub fn ensure_loopback(endpoint: &BrokerEndpoint, allow_remote: bool) -> Result<()> {
    if endpoint.is_loopback() {
        return Ok(());
    }
    if allow_remote {
        log::warn!(
            "broadcasting to remote broker {}:{}; make sure it sits on a trusted network",
            endpoint.host,
            endpoint.port
        );
        return Ok(());
    }
    Err(anyhow!(
        "broker {}:{} is not on loopback (set broadcast.allow_remote to override)",
        endpoint.host,
        endpoint.port
    ))
}

/// PEM material for TLS connections. Empty means system roots, no client auth.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path.map(|path| read_pem("CA certificate", path)).transpose()?;
        let client_auth = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some((
                read_pem("client certificate", cert)?,
                read_pem("client key", key)?,
            )),
            (None, None) => None,
            (Some(_), None) => return Err(anyhow!("TLS client certificate given without a key")),
            (None, Some(_)) => return Err(anyhow!("TLS client key given without a certificate")),
        };
        Ok(Self { ca, client_auth })
    }

    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.client_auth.is_none()
    }
}

fn read_pem(what: &str, path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read TLS {} {}", what, path.display()))
}

/// Pick the rumqttc transport for an endpoint.
pub fn build_transport(endpoint: &BrokerEndpoint, tls: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if !tls.is_empty() {
            return Err(anyhow!(
                "TLS material configured but the broker address is plain TCP (use mqtts:// or broadcast.use_tls)"
            ));
        }
        return Ok(Transport::tcp());
    }
    if tls.is_empty() {
        return Ok(Transport::tls_with_default_config());
    }
    let ca = tls
        .ca
        .clone()
        .ok_or_else(|| anyhow!("a TLS CA certificate is required with client certificates"))?;
    Ok(Transport::tls(ca, tls.client_auth.clone(), None))
}

/// Resolve broadcast settings into a checked endpoint and transport.
pub fn resolve_broker(settings: &BroadcastSettings) -> Result<(BrokerEndpoint, Transport)> {
    let endpoint = parse_broker_addr(&settings.broker_addr, settings.use_tls)?;
    ensure_loopback(&endpoint, settings.allow_remote)?;
    let tls = TlsMaterials::load(
        settings.tls_ca_path.as_deref(),
        settings.tls_client_cert_path.as_deref(),
        settings.tls_client_key_path.as_deref(),
    )?;
    let transport = build_transport(&endpoint, &tls)?;
    Ok((endpoint, transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_scheme_forms() {
        let ep = parse_broker_addr("127.0.0.1:1883", false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);

        let ep = parse_broker_addr("mqtts://dash.local:8883", false).unwrap();
        assert_eq!(ep.host, "dash.local");
        assert!(ep.use_tls);

        let ep = parse_broker_addr("tcp://localhost:1883", true).unwrap();
        assert!(ep.use_tls);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let ep = parse_broker_addr("mqtt://[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert!(ep.is_loopback());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(parse_broker_addr("ws://localhost:9001", false).is_err());
        assert!(parse_broker_addr("localhost", false).is_err());
        assert!(parse_broker_addr(":1883", false).is_err());
        assert!(parse_broker_addr("localhost:http", false).is_err());
    }

    #[test]
    fn remote_broker_needs_opt_in() {
        let ep = parse_broker_addr("192.168.4.20:1883", false).unwrap();
        assert!(ensure_loopback(&ep, false).is_err());
        assert!(ensure_loopback(&ep, true).is_ok());
    }

    #[test]
    fn client_cert_requires_key() {
        let err = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None)
            .unwrap_err();
        assert!(err.to_string().contains("without a key"));
    }

    #[test]
    fn tls_material_on_plain_endpoint_is_rejected() {
        let ep = parse_broker_addr("localhost:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&ep, &tls).is_err());
        assert!(build_transport(&ep, &TlsMaterials::default()).is_ok());
    }
}
