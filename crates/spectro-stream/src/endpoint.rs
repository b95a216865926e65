use std::fmt;

use spectro_types::{Result, SpectroError};
use url::{Host, Url};

/// Parsed `http://host[:port]/path` stream address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = Url::parse(input).map_err(|err| endpoint_error(input, &err.to_string()))?;

        let scheme = url.scheme().to_string();
        if scheme != "http" {
            return Err(endpoint_error(
                input,
                &format!("unsupported scheme '{scheme}'"),
            ));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(endpoint_error(input, "missing host")),
        };
        let port = url
            .port_or_known_default()
            .filter(|port| *port != 0)
            .ok_or_else(|| endpoint_error(input, "invalid port"))?;

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` form accepted by socket connect calls.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority(), self.path)
    }
}

fn endpoint_error(url: &str, reason: &str) -> SpectroError {
    SpectroError::Configuration(format!("invalid stream url '{url}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camera_url() {
        let endpoint = Endpoint::parse("http://192.168.100.13:81/stream").unwrap();
        assert_eq!(endpoint.scheme(), "http");
        assert_eq!(endpoint.host(), "192.168.100.13");
        assert_eq!(endpoint.port(), 81);
        assert_eq!(endpoint.path(), "/stream");
        assert_eq!(endpoint.authority(), "192.168.100.13:81");
    }

    #[test]
    fn defaults_port_and_path() {
        let endpoint = Endpoint::parse("http://cam.local").unwrap();
        assert_eq!(endpoint.port(), 80);
        assert_eq!(endpoint.path(), "/");
        assert_eq!(endpoint.to_string(), "http://cam.local:80/");
    }

    #[test]
    fn handles_ipv6_literals() {
        let endpoint = Endpoint::parse("http://[::1]:8081/mjpeg?fps=10").unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.port(), 8081);
        assert_eq!(endpoint.path(), "/mjpeg?fps=10");
        assert_eq!(endpoint.authority(), "[::1]:8081");
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "192.168.0.1:81/stream",
            "http://:81/stream",
            "http://cam:99999/stream",
            "http://cam:0/",
            "rtsp://cam/stream",
            "https://cam/stream",
            "http://[::1/stream",
        ] {
            assert!(
                matches!(Endpoint::parse(url), Err(SpectroError::Configuration(_))),
                "{url} should be rejected"
            );
        }
    }
}
