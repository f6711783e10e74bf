//! TLS channel setup: every connection is wrapped in TLS with the
//! `edgedb-binary` ALPN protocol before the handshake starts.

use std::io::Cursor;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::TlsConnector;

use edgedb_errors::{ClientError, Error, ErrorKind};

use crate::builder::{Config, TlsSecurity};

pub(crate) const ALPN_PROTOCOL: &[u8] = b"edgedb-binary";

pub(crate) fn connector(config: &Config) -> Result<TlsConnector, Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(pem) = &config.pem_certificates {
        for cert in read_root_cert_pem(pem)? {
            roots
                .add(cert)
                .map_err(|e| ClientError::with_source(e).context("invalid root certificate"))?;
        }
    }
    let roots = Arc::new(roots);

    let mut tls = match config.tls_security {
        TlsSecurity::Strict => rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
        TlsSecurity::NoHostVerification => {
            let inner = WebPkiServerVerifier::builder(roots)
                .build()
                .map_err(ClientError::with_source)?;
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(IgnoreHostnameVerifier::new(inner)))
                .with_no_client_auth()
        }
        TlsSecurity::Insecure => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NullVerifier))
            .with_no_client_auth(),
    };
    tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(TlsConnector::from(Arc::new(tls)))
}

pub(crate) fn read_root_cert_pem(data: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut cursor = Cursor::new(data);
    let mut certs = Vec::new();
    for item in rustls_pemfile::read_all(&mut cursor) {
        match item {
            Ok(rustls_pemfile::Item::X509Certificate(data)) => {
                certs.push(data);
            }
            Ok(rustls_pemfile::Item::Pkcs1Key(_))
            | Ok(rustls_pemfile::Item::Pkcs8Key(_))
            | Ok(rustls_pemfile::Item::Sec1Key(_)) => {
                log::debug!("Skipping private key in cert data");
            }
            Ok(rustls_pemfile::Item::Crl(_)) => {
                log::debug!("Skipping CRL in cert data");
            }
            Ok(_) => {
                log::debug!("Skipping unknown item cert data");
            }
            Err(e) => {
                return Err(ClientError::with_message(format!(
                    "could not parse PEM certificates: {e:?}"
                )));
            }
        }
    }
    Ok(certs)
}

/// Validates the certificate chain but tolerates a host name mismatch.
#[derive(Debug)]
struct IgnoreHostnameVerifier {
    verifier: Arc<dyn ServerCertVerifier>,
}

impl IgnoreHostnameVerifier {
    fn new(verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self { verifier }
    }
}

impl ServerCertVerifier for IgnoreHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(validated) => Ok(validated),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            Err(e) => Err(e),
        }
    }
    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }
    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}

/// Accepts any certificate. Used for `TlsSecurity::Insecure`.
#[derive(Debug)]
struct NullVerifier;

impl ServerCertVerifier for NullVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
