use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use crate::error::KeystoreError;

/// Key material extracted from a PKCS#12 keystore.
#[derive(Debug)]
pub struct KeyMaterial {
    pub private_key: PKey<Private>,
    pub certificate: X509,
    pub chain: Vec<X509>,
}

/// Load and validate key material from a keystore file.
pub fn load_from_file(path: &Path, password: &str) -> Result<KeyMaterial, KeystoreError> {
    let data = std::fs::read(path).map_err(|e| KeystoreError::NotFound {
        path: path.display().to_string(),
        source: e,
    })?;
    load_from_bytes(&data, password)
}

/// Parse a PKCS#12 container and validate the signing certificate.
///
/// PKCS#12 holds a single key entry, so there is no alias to choose; a
/// container without a private key or certificate is rejected outright.
pub fn load_from_bytes(data: &[u8], password: &str) -> Result<KeyMaterial, KeystoreError> {
    let pkcs12 = Pkcs12::from_der(data).map_err(KeystoreError::Malformed)?;
    let parsed = pkcs12.parse2(password).map_err(KeystoreError::BadPassword)?;

    let private_key = parsed.pkey.ok_or(KeystoreError::NoPrivateKey)?;
    let certificate = parsed.cert.ok_or(KeystoreError::NoCertificate)?;
    let chain = parsed
        .ca
        .map(|stack| stack.into_iter().collect())
        .unwrap_or_default();

    let now = Asn1Time::days_from_now(0).map_err(KeystoreError::Malformed)?;
    if certificate.not_after() < now {
        return Err(KeystoreError::Expired {
            not_after: certificate.not_after().to_string(),
        });
    }

    Ok(KeyMaterial {
        private_key,
        certificate,
        chain,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeystoreError;

    #[test]
    fn loads_key_and_certificate() {
        let der = test_support::pkcs12_bytes("changeit", 365);
        let material = load_from_bytes(&der, "changeit").unwrap();
        assert!(material.private_key.rsa().is_ok());
        assert_eq!(
            material
                .certificate
                .subject_name()
                .entries()
                .count(),
            2
        );
    }

    #[test]
    fn wrong_password_is_rejected() {
        let der = test_support::pkcs12_bytes("changeit", 365);
        let err = load_from_bytes(&der, "nope").unwrap_err();
        assert!(matches!(err, KeystoreError::BadPassword(_)));
    }

    #[test]
    fn garbage_is_not_a_keystore() {
        let err = load_from_bytes(b"not a keystore", "changeit").unwrap_err();
        assert!(matches!(err, KeystoreError::Malformed(_)));
    }

    #[test]
    fn expired_certificate_is_rejected() {
        let der = test_support::pkcs12_bytes("changeit", -2);
        let err = load_from_bytes(&der, "changeit").unwrap_err();
        assert!(matches!(err, KeystoreError::Expired { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_from_file(Path::new("/nonexistent/my.p12"), "pw").unwrap_err();
        match err {
            KeystoreError::NotFound { path, .. } => assert!(path.contains("my.p12")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
