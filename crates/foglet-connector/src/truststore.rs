//! Per-connector trust-store files.
//!
//! The connector certificate arrives inline in the controller-provided
//! config; it is persisted under `{trust_store_dir}/{name}.pem` so the
//! TLS stack (and the operator) can find it on disk.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};

/// Write the connector certificate to its trust-store file.
///
/// Idempotent: an existing file with identical content is left alone,
/// a stale one is overwritten.
pub fn materialize_trust_store(
    trust_store_dir: &Path,
    connector_name: &str,
    cert_pem: &str,
) -> ConnectorResult<PathBuf> {
    std::fs::create_dir_all(trust_store_dir)
        .map_err(|e| ConnectorError::TrustStore(e.to_string()))?;

    let path = trust_store_dir.join(format!("{connector_name}.pem"));
    let up_to_date = std::fs::read_to_string(&path)
        .map(|existing| existing == cert_pem)
        .unwrap_or(false);

    if !up_to_date {
        std::fs::write(&path, cert_pem)
            .map_err(|e| ConnectorError::TrustStore(e.to_string()))?;
        debug!(connector = connector_name, path = %path.display(), "trust store written");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n";

    #[test]
    fn writes_the_cert_under_the_connector_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = materialize_trust_store(dir.path(), "edge-1", CERT).unwrap();

        assert_eq!(path, dir.path().join("edge-1.pem"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CERT);
    }

    #[test]
    fn rewrites_when_the_cert_changes() {
        let dir = tempfile::tempdir().unwrap();
        materialize_trust_store(dir.path(), "edge-1", CERT).unwrap();
        let path = materialize_trust_store(dir.path(), "edge-1", "new-cert").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new-cert");
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let path = materialize_trust_store(&nested, "edge-1", CERT).unwrap();
        assert!(path.exists());
    }
}
