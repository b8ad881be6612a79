use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig as RustlsConfig;
use pgwire::tokio::TlsAcceptor;

/// Process-level settings, resolved once at startup from `SLOTWISE_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub dispatch_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotwise".into(),
            max_connections: 256,
            compact_threshold: 1000,
            dispatch_interval: Duration::from_secs(30),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults, malformed
    /// numbers are an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> io::Result<Option<T>> {
            raw.map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| io::Error::new(ErrorKind::InvalidInput, format!("{key}: cannot parse {v:?}")))
            })
            .transpose()
        }

        let d = Self::default();
        let cfg = Self {
            port: parsed("SLOTWISE_PORT", get("SLOTWISE_PORT"))?.unwrap_or(d.port),
            bind: get("SLOTWISE_BIND").unwrap_or(d.bind),
            data_dir: get("SLOTWISE_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("SLOTWISE_PASSWORD").unwrap_or(d.password),
            max_connections: parsed("SLOTWISE_MAX_CONNECTIONS", get("SLOTWISE_MAX_CONNECTIONS"))?
                .unwrap_or(d.max_connections),
            compact_threshold: parsed("SLOTWISE_COMPACT_THRESHOLD", get("SLOTWISE_COMPACT_THRESHOLD"))?
                .unwrap_or(d.compact_threshold),
            dispatch_interval: parsed::<u64>("SLOTWISE_DISPATCH_INTERVAL_SECS", get("SLOTWISE_DISPATCH_INTERVAL_SECS"))?
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(d.dispatch_interval),
            metrics_port: parsed("SLOTWISE_METRICS_PORT", get("SLOTWISE_METRICS_PORT"))?,
            tls_cert: get("SLOTWISE_TLS_CERT"),
            tls_key: get("SLOTWISE_TLS_KEY"),
        };
        if cfg.max_connections == 0 {
            return Err(io::Error::new(ErrorKind::InvalidInput, "SLOTWISE_MAX_CONNECTIONS must be positive"));
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

pub fn load_tls_acceptor(cert_path: Option<&str>, key_path: Option<&str>) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both SLOTWISE_TLS_CERT and SLOTWISE_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.addr(), "0.0.0.0:5433");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("SLOTWISE_PORT", "6000"),
            ("SLOTWISE_DATA_DIR", "/var/lib/slotwise"),
            ("SLOTWISE_DISPATCH_INTERVAL_SECS", "0"),
            ("SLOTWISE_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotwise"));
        assert_eq!(cfg.dispatch_interval, Duration::from_secs(1));
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("SLOTWISE_PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("SLOTWISE_PORT"));
        assert!(ServerConfig::from_lookup(lookup(&[("SLOTWISE_MAX_CONNECTIONS", "0")])).is_err());
    }

    #[test]
    fn tls_needs_both_paths() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
        assert!(load_tls_acceptor(Some("cert.pem"), None).is_err());
    }
}
