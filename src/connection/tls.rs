//! TLS options, validation and rustls configuration.
//!
//! The X Protocol starts every TCP connection in plaintext. When TLS is
//! wanted the client asks for the `tls` capability and, once the server
//! agrees, wraps the existing stream in a TLS session.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

/// SSL/TLS mode, ordered from weakest to strictest.
///
/// Comparisons follow that order: `Disabled < Preferred < Required < VerifyCa
/// < VerifyIdentity`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disabled,
    /// TLS if the server supports it, plaintext otherwise
    Preferred,
    /// TLS required, server certificate is not verified
    #[default]
    Required,
    /// TLS required, server certificate must be signed by the configured CA
    VerifyCa,
    /// As `VerifyCa`, and the certificate must match the host name
    VerifyIdentity,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        *self >= Self::VerifyCa
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Preferred => write!(f, "preferred"),
            Self::Required => write!(f, "required"),
            Self::VerifyCa => write!(f, "verify_ca"),
            Self::VerifyIdentity => write!(f, "verify_identity"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" => Ok(Self::Disabled),
            "preferred" => Ok(Self::Preferred),
            "required" => Ok(Self::Required),
            "verify_ca" => Ok(Self::VerifyCa),
            "verify_identity" => Ok(Self::VerifyIdentity),
            _ => Err(Error::Config(format!(
                "invalid ssl-mode '{}': expected disabled, preferred, required, verify_ca, or verify_identity",
                s
            ))),
        }
    }
}

/// TLS options of a network endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Required strictness
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Path to a PEM CA bundle
    #[serde(default)]
    pub ssl_ca: Option<String>,
}

impl TlsOptions {
    /// Options with the given mode and no CA bundle
    pub fn new(ssl_mode: SslMode) -> Self {
        Self {
            ssl_mode,
            ssl_ca: None,
        }
    }

    /// Set the CA bundle path
    pub fn ssl_ca(mut self, path: impl Into<String>) -> Self {
        self.ssl_ca = Some(path.into());
        self
    }

    /// CA path, treating an empty string as unset
    pub fn ca_path(&self) -> Option<&str> {
        self.ssl_ca.as_deref().filter(|p| !p.is_empty())
    }

    /// Check that the mode and CA bundle agree.
    ///
    /// A CA bundle only makes sense when the certificate is verified, and
    /// verification is impossible without one.
    pub fn validate(&self) -> Result<()> {
        let has_ca = self.ca_path().is_some();

        if has_ca && !self.ssl_mode.requires_verification() {
            return Err(Error::Config(
                "ssl-ca set and ssl-mode different than verify_ca or verify_identity".into(),
            ));
        }

        if self.ssl_mode.requires_verification() && !has_ca {
            return Err(Error::Config("missing ssl-ca option to verify CA".into()));
        }

        Ok(())
    }
}

/// Compiled TLS client configuration for one endpoint.
#[derive(Clone)]
pub struct TlsConfig {
    ssl_mode: SslMode,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Build the rustls configuration matching `options`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the options are invalid or TLS is disabled,
    /// and `Error::Tls` if the CA bundle cannot be loaded.
    pub fn from_options(options: &TlsOptions) -> Result<Self> {
        options.validate()?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {}", e)))?;

        let client_config = match options.ssl_mode {
            SslMode::Disabled => {
                return Err(Error::Config("TLS is disabled for this endpoint".into()));
            }
            SslMode::Preferred | SslMode::Required => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
                .with_no_client_auth(),
            SslMode::VerifyCa => {
                let roots = load_ca_bundle(options.ca_path().unwrap_or_default())?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(CaVerification {
                        roots: Arc::new(roots),
                        provider,
                    }))
                    .with_no_client_auth()
            }
            SslMode::VerifyIdentity => {
                let roots = load_ca_bundle(options.ca_path().unwrap_or_default())?;
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };

        Ok(Self {
            ssl_mode: options.ssl_mode,
            client_config: Arc::new(client_config),
        })
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Mode this configuration was built for
    pub fn ssl_mode(&self) -> SslMode {
        self.ssl_mode
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ssl_mode", &self.ssl_mode)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Load a PEM CA bundle into a root store.
fn load_ca_bundle(ca_path: &str) -> Result<RootCertStore> {
    let ca_cert_data = fs::read(ca_path).map_err(|e| {
        Error::Tls(format!(
            "failed to read CA certificate file '{}': {}",
            ca_path, e
        ))
    })?;

    let mut reader = std::io::Cursor::new(&ca_cert_data);
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let (added, _) = root_store.add_parsable_certificates(std::iter::once(cert));
                found_certs += added;
            }
            Ok(Some(_)) => {} // keys and CRLs are not trust anchors
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Tls(format!(
                    "failed to parse CA certificate from '{}'",
                    ca_path
                )));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Tls(format!(
            "no valid certificates found in '{}'",
            ca_path
        )));
    }

    Ok(root_store)
}

/// Encrypt without authenticating the server (`preferred`, `required`).
///
/// Handshake signatures are still checked so the session keys belong to
/// whoever holds the presented certificate.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Verify the certificate chain against the CA bundle, ignoring the host name
/// (`verify_ca`).
#[derive(Debug)]
struct CaVerification {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for CaVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is invalid.
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>> {
    // Remove trailing dot and IPv6 brackets if present
    let hostname = hostname
        .trim_end_matches('.')
        .trim_start_matches('[')
        .trim_end_matches(']');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Config(format!("invalid hostname for TLS: '{}'", hostname)))
}
