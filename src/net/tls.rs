//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Serve the certificate from disk, picking up rotated files without restart
//! - Build the client CA trust pool for mutual TLS
//! - Assemble the rustls server configuration
//!
//! # Design Decisions
//! - The key file's modification time decides whether to reload
//! - Reload happens at handshake time, no file watcher
//! - ring is the only crypto provider in use

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("unsupported private key in {path}: {source}")]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("no client CA certificates could be loaded")]
    NoClientCas,
    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
    #[error("failed to build server configuration: {0}")]
    Config(#[from] rustls::Error),
}

struct Cached {
    key: Arc<CertifiedKey>,
    modified: SystemTime,
}

/// Certificate resolver that reloads the certificate pair when the key file changes.
pub struct CertReloader {
    cert_file: PathBuf,
    key_file: PathBuf,
    cached: Mutex<Cached>,
}

impl CertReloader {
    /// Load the certificate pair eagerly so that bad material fails at startup.
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Result<Self, TlsError> {
        let cert_file = cert_file.into();
        let key_file = key_file.into();
        let modified = modified(&key_file)?;
        let key = load_certified_key(&cert_file, &key_file)?;

        Ok(Self {
            cert_file,
            key_file,
            cached: Mutex::new(Cached { key, modified }),
        })
    }

    /// The current certificate, reloaded first if the key file is newer than the cached copy.
    pub fn get_certificate(&self) -> Result<Arc<CertifiedKey>, TlsError> {
        let modified = modified(&self.key_file)?;
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if modified > cached.modified {
            let key = load_certified_key(&self.cert_file, &self.key_file)?;
            tracing::info!(
                cert = %self.cert_file.display(),
                key = %self.key_file.display(),
                "Reloaded TLS certificate"
            );
            *cached = Cached { key, modified };
        }

        Ok(Arc::clone(&cached.key))
    }
}

impl fmt::Debug for CertReloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertReloader")
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for CertReloader {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.get_certificate() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load TLS certificate");
                None
            }
        }
    }
}

fn modified(path: &Path) -> Result<SystemTime, TlsError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn load_certified_key(cert_file: &Path, key_file: &Path) -> Result<Arc<CertifiedKey>, TlsError> {
    let chain = read_certs(cert_file)?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificate(cert_file.to_path_buf()));
    }

    let key = read_private_key(key_file)?;
    let signing_key = ring::sign::any_supported_type(&key).map_err(|source| TlsError::UnsupportedKey {
        path: key_file.to_path_buf(),
        source,
    })?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Collect CA certificates from files and directories.
///
/// Directories are walked recursively. Files that cannot be read or parsed are
/// logged and skipped.
pub fn load_client_cas<P: AsRef<Path>>(paths: &[P]) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    for path in paths {
        add_path(&mut roots, path.as_ref());
    }
    roots
}

fn add_path(roots: &mut RootCertStore, path: &Path) {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read client CA path");
            return;
        }
    };

    if meta.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read client CA directory");
                return;
            }
        };
        let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        children.sort();
        for child in children {
            let linked_dir = fs::symlink_metadata(&child)
                .is_ok_and(|meta| meta.file_type().is_symlink() && child.is_dir());
            if linked_dir {
                tracing::debug!(path = %child.display(), "Skipping symlinked client CA directory");
                continue;
            }
            add_path(roots, &child);
        }
        return;
    }

    let certs = match read_certs(path) {
        Ok(certs) => certs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read client CA file");
            return;
        }
    };
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        tracing::error!(path = %path.display(), "No client CA certificate found in file");
    }
    tracing::debug!(path = %path.display(), added, ignored, "Loaded client CA file");
}

/// Server configuration with the reloading resolver.
///
/// Client certificates are required and verified against `client_cas` when
/// given. An empty trust pool is an error.
pub fn server_config(
    reloader: Arc<CertReloader>,
    client_cas: Option<RootCertStore>,
) -> Result<ServerConfig, TlsError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let mut config = match client_cas {
        Some(roots) => {
            if roots.is_empty() {
                return Err(TlsError::NoClientCas);
            }
            let verifier = client_verifier(roots, provider)?;
            builder
                .with_client_cert_verifier(verifier)
                .with_cert_resolver(reloader)
        }
        None => builder.with_no_client_auth().with_cert_resolver(reloader),
    };

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn client_verifier(
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, TlsError> {
    Ok(WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?)
}
