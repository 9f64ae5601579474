//! TLS connector construction shared by the sync and tokio drivers.

use crate::config::Config;
use crate::error::Result;

/// Build a TLS connector honoring sslmode and the certificate options.
///
/// `sslmode=require` skips verification entirely; `verify-ca` checks the
/// chain; `verify-full` also checks the host name.
pub fn build_tls_connector(config: &Config) -> Result<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if !config.ssl_mode.verifies_certificate() {
        builder.danger_accept_invalid_certs(true);
    }
    if !config.ssl_mode.verifies_hostname() {
        builder.danger_accept_invalid_hostnames(true);
    }

    if let Some(root) = &config.ssl_root_cert {
        let pem = std::fs::read(root)?;
        let cert = native_tls::Certificate::from_pem(&pem)?;
        builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&config.ssl_cert, &config.ssl_key) {
        let cert = std::fs::read(cert_path)?;
        let key = std::fs::read(key_path)?;
        let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
        builder.identity(identity);
    }

    Ok(builder.build()?)
}
