use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";
pub const DH_FILE: &str = "dh2048.pem";

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Builds the TLS acceptor from the certificate directory.
///
/// The directory must hold `server.crt`, `server.key` and `dh2048.pem`.
/// The key may be an encrypted PKCS#8 key, in which case `password` is
/// required. Key exchange is always ECDHE, so the DH parameters are only
/// checked for presence.
pub fn load_acceptor(cert_dir: &Path, password: Option<&str>) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(&cert_dir.join(CERT_FILE))?;
    let key = load_key(&cert_dir.join(KEY_FILE), password)?;

    let dh = cert_dir.join(DH_FILE);
    if !dh.is_file() {
        bail!("missing {}", dh.display());
    }
    debug!(path = %dh.display(), "DH parameters present but unused with ECDHE");

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .context("no usable TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate or key")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path, password: Option<&str>) -> anyhow::Result<PrivateKeyDer<'static>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    if text.contains(ENCRYPTED_KEY_LABEL) {
        let password = password.ok_or_else(|| {
            anyhow!("{} is encrypted but no key password is configured", path.display())
        })?;
        return decrypt_key(&text, password)
            .with_context(|| format!("failed to decrypt {}", path.display()));
    }

    rustls_pemfile::private_key(&mut text.as_bytes())
        .with_context(|| format!("failed to parse {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key in {}", path.display()))
}

fn decrypt_key(pem: &str, password: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let (label, document) = pkcs8::Document::from_pem(pem).map_err(|e| anyhow!("{e}"))?;
    if label != ENCRYPTED_KEY_LABEL {
        bail!("unexpected PEM label {label:?}");
    }
    let info = pkcs8::EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| anyhow!("{e}"))?;
    let secret = info.decrypt(password).map_err(|e| anyhow!("{e}"))?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        secret.as_bytes().to_vec(),
    )))
}
