//! Self-signed client certificate material
//!
//! OPC-UA secure channels identify the client by an X.509 certificate
//! and reference the peer certificate by its SHA-1 thumbprint. This
//! module generates a self-signed certificate with rcgen and keeps the
//! DER and key on disk so a bundle can be reused across runs.

use icsprobe_core::{Error, Result};
use rcgen::{CertificateParams, DnType, KeyPair, SanType};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

const CERT_FILE: &str = "client_cert.der";
const KEY_FILE: &str = "client_key.pem";

fn cert_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Certificate(e.to_string())
}

/// On-disk client certificate plus its SHA-1 thumbprint
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    cert_path: PathBuf,
    key_path: PathBuf,
    thumbprint: Vec<u8>,
}

impl CertificateBundle {
    /// Generate a self-signed certificate into `dir`.
    ///
    /// The application URI lands in the subject alternative names,
    /// which is where OPC-UA servers look for the client identity.
    pub fn generate(dir: &Path, application_uri: &str, common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(cert_err)?;
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .subject_alt_names
            .push(SanType::URI(application_uri.try_into().map_err(cert_err)?));

        let key_pair = KeyPair::generate().map_err(cert_err)?;
        let certificate = params.self_signed(&key_pair).map_err(cert_err)?;
        let der = certificate.der().to_vec();

        fs::create_dir_all(dir)?;
        let cert_path = dir.join(CERT_FILE);
        let key_path = dir.join(KEY_FILE);
        fs::write(&cert_path, &der)?;
        fs::write(&key_path, key_pair.serialize_pem())?;

        Ok(Self {
            cert_path,
            key_path,
            thumbprint: sha1_of(&der),
        })
    }

    /// Load a previously generated certificate from disk
    pub fn load<C: Into<PathBuf>, K: Into<PathBuf>>(cert_path: C, key_path: K) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let der = fs::read(&cert_path)
            .map_err(|e| Error::Certificate(format!("{}: {}", cert_path.display(), e)))?;
        if !key_path.is_file() {
            return Err(Error::Certificate(format!(
                "private key not found at {}",
                key_path.display()
            )));
        }
        Ok(Self {
            cert_path,
            key_path,
            thumbprint: sha1_of(&der),
        })
    }

    /// Certificate in DER form, as sent in OpenSecureChannel
    pub fn der(&self) -> Result<Vec<u8>> {
        fs::read(&self.cert_path)
            .map_err(|e| Error::Certificate(format!("{}: {}", self.cert_path.display(), e)))
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// SHA-1 thumbprint of the DER certificate
    pub fn thumbprint(&self) -> &[u8] {
        &self.thumbprint
    }

    pub fn thumbprint_hex(&self) -> String {
        hex::encode_upper(&self.thumbprint)
    }
}

fn sha1_of(der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(der);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_writes_cert_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let bundle =
            CertificateBundle::generate(dir.path(), "urn:probe:client", "probe client").unwrap();

        assert!(bundle.cert_path().is_file());
        assert!(bundle.key_path().is_file());
        assert_eq!(bundle.thumbprint().len(), 20);
        assert_eq!(bundle.thumbprint_hex().len(), 40);
        assert!(!bundle.der().unwrap().is_empty());
    }

    #[test]
    fn test_load_round_trips_thumbprint() {
        let dir = tempfile::tempdir().unwrap();
        let generated =
            CertificateBundle::generate(dir.path(), "urn:probe:client", "probe client").unwrap();
        let loaded =
            CertificateBundle::load(generated.cert_path(), generated.key_path()).unwrap();

        assert_eq!(loaded.thumbprint(), generated.thumbprint());
    }

    #[test]
    fn test_load_missing_cert_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = CertificateBundle::load(
            dir.path().join("absent.der"),
            dir.path().join("absent.pem"),
        );
        assert!(matches!(result, Err(Error::Certificate(_))));
    }
}
