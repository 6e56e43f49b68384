use crate::error::{Error, Result};
use rasn_pkix::Certificate;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::path::Path;
use zeroize::Zeroizing;

/// Signing identity loaded from a PKCS#12 key/certificate bundle.
///
/// The leaf certificate is the one whose public key matches the bundled
/// private key; every other certificate in the bundle is carried along into
/// the SignedData so verifiers can build the chain.
pub struct Signer {
    key: RsaPrivateKey,
    cert: Certificate,
    intermediates: Vec<Certificate>,
}

impl Signer {
    /// Parses a PKCS#12 blob. `passphrase` may be empty for unprotected
    /// bundles.
    pub fn from_pkcs12(der: &[u8], passphrase: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(der).map_err(Error::crypto("pkcs12 parse"))?;
        if !pfx.verify_mac(passphrase) {
            return Err(Error::Crypto {
                stage: "pkcs12 mac",
                reason: "wrong passphrase or corrupt key file".into(),
            });
        }
        let mut key_bags = pfx
            .key_bags(passphrase)
            .map_err(Error::crypto("pkcs12 key"))?;
        let key_der = Zeroizing::new(key_bags.pop().ok_or(Error::Crypto {
            stage: "pkcs12 key",
            reason: "no private key in bundle".into(),
        })?);
        let key =
            RsaPrivateKey::from_pkcs8_der(&key_der).map_err(Error::crypto("key decode"))?;

        let mut certs = Vec::new();
        for der in pfx
            .cert_x509_bags(passphrase)
            .map_err(Error::crypto("pkcs12 certificates"))?
        {
            certs.push(
                rasn::der::decode::<Certificate>(&der)
                    .map_err(Error::crypto("certificate decode"))?,
            );
        }

        let pubkey = key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(Error::crypto("key encode"))?;
        let (mut leaves, intermediates): (Vec<_>, Vec<_>) = certs.into_iter().partition(|cert| {
            cert.tbs_certificate
                .subject_public_key_info
                .subject_public_key
                .as_raw_slice()
                == pubkey.as_bytes()
        });
        if leaves.len() > 1 {
            return Err(Error::Crypto {
                stage: "signer selection",
                reason: "multiple certificates match the signing key".into(),
            });
        }
        let cert = leaves.pop().ok_or(Error::Crypto {
            stage: "signer selection",
            reason: "no certificate matches the signing key".into(),
        })?;

        Ok(Self {
            key,
            cert,
            intermediates,
        })
    }

    pub fn from_pkcs12_file(path: &Path, passphrase: &str) -> Result<Self> {
        let der = Zeroizing::new(std::fs::read(path).map_err(Error::io(path))?);
        Self::from_pkcs12(&der, passphrase)
    }

    /// RSA-PKCS#1 v1.5 signature over the SHA-256 of `bytes`.
    pub fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(bytes);
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(Error::crypto("signature"))
    }

    pub fn cert(&self) -> &Certificate {
        &self.cert
    }

    pub fn intermediates(&self) -> &[Certificate] {
        &self.intermediates
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("cert", &self.cert)
            .field("intermediates", &self.intermediates.len())
            .finish_non_exhaustive()
    }
}
