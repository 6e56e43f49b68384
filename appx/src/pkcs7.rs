use crate::error::{Error, Result};
use crate::sign::Signer;
use rasn::prelude::*;
use rasn_cms::pkcs7_compat::{EncapsulatedContentInfo, SignedData};
use rasn_cms::{
    AlgorithmIdentifier, CertificateChoices, IssuerAndSerialNumber, SignerIdentifier, SignerInfo,
};
use rasn_pkix::Attribute;
use sha2::{Digest, Sha256};

pub const SPC_INDIRECT_DATA_OBJID: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 4]);
pub const SPC_SP_OPUS_INFO_OBJID: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 12]);
pub const SPC_SIPINFO_OBJID: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 1, 30]);
pub const RSA_ENCRYPTION_OBJID: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 1]);

/// Builds the Authenticode-style SignedData around an already-encoded
/// SpcIndirectDataContext. The message-digest attribute covers the indirect
/// data value (skipping its outer type and length), and the signature covers
/// the DER of the signed attributes.
pub fn build_pkcs7(
    signer: &Signer,
    encap_content_info: EncapsulatedContentInfo,
) -> Result<SignedData> {
    let digest = Sha256::digest(&encap_content_info.content.as_ref().expect("content present").as_bytes()[8..]);

    let digest_algorithm = AlgorithmIdentifier {
        algorithm:
            Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256.into(),
        parameters: Some(Any::new(vec![5, 0])),
    };
    let signed_attrs = {
        let mut signed_attrs = SetOf::default();
        signed_attrs.insert(Attribute {
            r#type: Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS9_CONTENT_TYPE.into(),
            values: {
                let mut content_type = SetOf::default();
                content_type.insert(Any::new(der(&ObjectIdentifier::from(
                    SPC_INDIRECT_DATA_OBJID,
                ))?));
                content_type
            },
        });
        signed_attrs.insert(Attribute {
            r#type: Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS9_MESSAGE_DIGEST.into(),
            values: {
                let mut digests = SetOf::default();
                digests.insert(Any::new(der(&OctetString::from(digest.to_vec()))?));
                digests
            },
        });
        signed_attrs.insert(Attribute {
            r#type: SPC_SP_OPUS_INFO_OBJID.into(),
            values: {
                let mut info = SetOf::default();
                info.insert(Any::new(der(&SequenceOf::<()>::default())?));
                info
            },
        });
        signed_attrs
    };
    let signature = signer.sign(&der(&signed_attrs)?)?;

    let cert = signer.cert();
    let signer_info = SignerInfo {
        version: 1.into(),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        }),
        digest_algorithm: digest_algorithm.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: signature_algorithm(),
        signature: OctetString::from(signature),
        unsigned_attrs: Some(SetOf::default()),
    };
    Ok(SignedData {
        version: 1.into(),
        digest_algorithms: {
            let mut digest_algorithms = SetOf::default();
            digest_algorithms.insert(digest_algorithm);
            digest_algorithms
        },
        encap_content_info,
        certificates: Some({
            let mut certificates = SetOf::default();
            certificates.insert(CertificateChoices::Certificate(Box::new(cert.clone())));
            for intermediate in signer.intermediates() {
                certificates.insert(CertificateChoices::Certificate(Box::new(
                    intermediate.clone(),
                )));
            }
            certificates
        }),
        crls: None,
        signer_infos: {
            let mut signer_infos = SetOf::default();
            signer_infos.insert(signer_info);
            signer_infos
        },
    })
}

/// rsaEncryption with NULL parameters, the SignerInfo signatureAlgorithm for
/// an RSA-PKCS#1 v1.5 signature.
pub(crate) fn signature_algorithm() -> AlgorithmIdentifier {
    AlgorithmIdentifier {
        algorithm: RSA_ENCRYPTION_OBJID.into(),
        parameters: Some(Any::new(vec![5, 0])),
    }
}

pub(crate) fn der<T: Encode>(value: &T) -> Result<Vec<u8>> {
    rasn::der::encode(value).map_err(Error::crypto("der encoding"))
}
