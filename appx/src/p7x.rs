use crate::error::Result;
use crate::pkcs7::{build_pkcs7, der, SPC_INDIRECT_DATA_OBJID, SPC_SIPINFO_OBJID};
use crate::sign::Signer;
use rasn::prelude::*;
use rasn_cms::pkcs7_compat::EncapsulatedContentInfo;
use rasn_cms::{ContentInfo, CONTENT_SIGNED_DATA};

const P7X_MAGIC: u32 = 0x504b4358;

/// The five digests the signature binds to the archive.
#[derive(Clone, Copy, Debug, Default)]
pub struct Digests {
    /// Local file records, in emission order, up to the signature entry.
    pub axpc: [u8; 32],
    /// Central directory records, excluding the signature entry's record.
    pub axcd: [u8; 32],
    /// Uncompressed `[Content_Types].xml`.
    pub axct: [u8; 32],
    /// Uncompressed `AppxBlockMap.xml`.
    pub axbm: [u8; 32],
    /// Uncompressed `AppxMetadata/CodeIntegrity.cat`, or zeros when absent.
    pub axci: [u8; 32],
}

impl Digests {
    /// The 184-byte structure the signature covers: an `APPX` tag followed by
    /// five tagged digests in fixed order.
    pub fn footprint(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(184);
        payload.extend_from_slice(b"APPX");
        payload.extend_from_slice(b"AXPC");
        payload.extend_from_slice(&self.axpc);
        payload.extend_from_slice(b"AXCD");
        payload.extend_from_slice(&self.axcd);
        payload.extend_from_slice(b"AXCT");
        payload.extend_from_slice(&self.axct);
        payload.extend_from_slice(b"AXBM");
        payload.extend_from_slice(&self.axbm);
        payload.extend_from_slice(b"AXCI");
        payload.extend_from_slice(&self.axci);
        payload
    }
}

/// Produces the uncompressed payload of `AppxSignature.p7x`: the `PKCX` magic
/// followed by the DER of the detached PKCS#7 SignedData.
pub fn p7x(signer: &Signer, digests: &Digests) -> Result<Vec<u8>> {
    let payload = Payload::new(digests)?;
    let encap_content_info = EncapsulatedContentInfo {
        content_type: SPC_INDIRECT_DATA_OBJID.into(),
        content: Some(Any::new(payload)),
    };
    let signed_data = build_pkcs7(signer, encap_content_info)?;
    let content_info = ContentInfo {
        content_type: CONTENT_SIGNED_DATA.into(),
        content: Any::new(der(&signed_data)?),
    };
    let mut p7x = Vec::new();
    p7x.extend_from_slice(&P7X_MAGIC.to_be_bytes());
    p7x.extend(der(&content_info)?);
    Ok(p7x)
}

#[derive(AsnType, Clone, Debug, Eq, Encode, PartialEq)]
#[rasn(tag(context, 0))]
struct Payload {
    indirect_data: SpcIndirectData,
}

impl Payload {
    pub fn new(digests: &Digests) -> Result<Vec<u8>> {
        let indirect_data = SpcIndirectData::new(digests);
        der(&Self { indirect_data })
    }
}

#[derive(AsnType, Clone, Debug, Eq, Encode, PartialEq)]
struct SpcIndirectData {
    sip_info: SpcSipInfo,
    content: SpcIndirectDataContent,
}

impl SpcIndirectData {
    pub fn new(digests: &Digests) -> Self {
        Self {
            sip_info: Default::default(),
            content: SpcIndirectDataContent::new(digests.footprint()),
        }
    }
}

#[derive(AsnType, Clone, Debug, Eq, Encode, PartialEq)]
struct SpcIndirectDataContent {
    oid: [Open; 2],
    payload: OctetString,
}

impl SpcIndirectDataContent {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            oid: [
                Open::ObjectIdentifier(Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256.into()),
                Open::Null,
            ],
            payload: OctetString::from(payload),
        }
    }
}

#[derive(AsnType, Clone, Debug, Eq, Encode, PartialEq)]
struct SpcSipInfo {
    oid: ObjectIdentifier,
    data: SpcSipInfoContent,
}

impl Default for SpcSipInfo {
    fn default() -> Self {
        Self {
            oid: SPC_SIPINFO_OBJID.into(),
            data: Default::default(),
        }
    }
}

#[derive(AsnType, Clone, Debug, Eq, Encode, PartialEq)]
struct SpcSipInfoContent {
    i1: u32,
    s1: OctetString,
    i2: u32,
    i3: u32,
    i4: u32,
    i5: u32,
    i6: u32,
}

impl Default for SpcSipInfoContent {
    fn default() -> Self {
        const SPC_SIPINFO_MAGIC_INT: u32 = 0x0101_0000;
        const SPC_SIPINFO_MAGIC: [u8; 16] = [
            0x4b, 0xdf, 0xc5, 0x0a, 0x07, 0xce, 0xe2, 0x4d, 0xb7, 0x6e, 0x23, 0xc8, 0x39, 0xa0,
            0x9f, 0xd1,
        ];
        Self {
            i1: SPC_SIPINFO_MAGIC_INT,
            s1: OctetString::from(SPC_SIPINFO_MAGIC.to_vec()),
            i2: 0,
            i3: 0,
            i4: 0,
            i5: 0,
            i6: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGESTS: Digests = Digests {
        axpc: [
            37, 112, 168, 185, 134, 72, 152, 136, 166, 55, 137, 233, 153, 167, 81, 229, 137, 229,
            158, 190, 214, 181, 211, 85, 93, 172, 161, 115, 74, 99, 165, 156,
        ],
        axcd: [
            29, 87, 205, 69, 139, 92, 201, 89, 248, 232, 221, 244, 67, 120, 231, 192, 229, 135,
            200, 178, 242, 207, 83, 145, 88, 83, 238, 30, 255, 54, 226, 31,
        ],
        axct: [
            188, 251, 66, 139, 217, 90, 175, 33, 93, 159, 193, 116, 124, 19, 113, 188, 195, 138,
            75, 212, 185, 133, 87, 115, 195, 93, 4, 189, 198, 152, 59, 190,
        ],
        axbm: [
            228, 142, 202, 253, 204, 232, 223, 220, 131, 162, 12, 252, 106, 74, 3, 180, 190, 71,
            230, 173, 146, 218, 209, 13, 101, 4, 43, 186, 70, 46, 196, 194,
        ],
        axci: [
            175, 56, 231, 224, 95, 58, 68, 216, 201, 155, 33, 50, 3, 124, 19, 157, 149, 107, 194,
            174, 170, 108, 34, 110, 128, 107, 240, 29, 11, 129, 67, 233,
        ],
    };

    #[test]
    fn footprint_block_is_184_bytes_in_fixed_order() {
        let block = DIGESTS.footprint();
        assert_eq!(block.len(), 184);
        assert_eq!(&block[..4], b"APPX");
        assert_eq!(&block[4..8], b"AXPC");
        assert_eq!(&block[40..44], b"AXCD");
        assert_eq!(&block[76..80], b"AXCT");
        assert_eq!(&block[112..116], b"AXBM");
        assert_eq!(&block[148..152], b"AXCI");
        assert_eq!(&block[152..184], DIGESTS.axci);
    }

    #[test]
    fn signer_info_signature_algorithm_is_rsa_encryption() {
        // SEQUENCE { OID 1.2.840.113549.1.1.1 (rsaEncryption), NULL }
        let orig_algorithm = [
            48, 13, // sequence
            6, 9, 42, 134, 72, 134, 247, 13, 1, 1, 1, // oid 1.2.840.113549.1.1.1
            5, 0, // null
        ];
        let encoded = rasn::der::encode(&crate::pkcs7::signature_algorithm()).unwrap();
        assert_eq!(encoded, orig_algorithm);
    }

    #[test]
    fn sp_indirect_data() {
        let orig_indirect_data = [
            160, 130, 1, 8, 48, 130, 1, 4, // hash rest
            48, 53, // oid 1.3.6.1.4.1.311.2.1.30
            6, 10, 43, 6, 1, 4, 1, 130, 55, 2, 1, 30, // start sequence
            48, 39, // integer
            2, 4, 1, 1, 0, 0, // octet string tag
            4, 16, // octet string payload
            75, 223, 197, 10, 7, 206, 226, 77, 183, 110, 35, 200, 57, 160, 159, 209,
            // int 0
            2, 1, 0, // int 0
            2, 1, 0, // int 0
            2, 1, 0, // int 0
            2, 1, 0, // int 0
            2, 1, 0, // start sequence
            48, 129, 202, // start sequence
            48, 13, // oid 2.16.840.1.101.3.4.2.1
            6, 9, 96, 134, 72, 1, 101, 3, 4, 2, 1, // null
            5, 0, // octet string tag
            4, 129, 184, // octet string bytes
            65, 80, 80, 88, // signature
            65, 88, 80, 67, // axpc signature
            37, 112, 168, 185, 134, 72, 152, 136, // axpc hash
            166, 55, 137, 233, 153, 167, 81, 229, 137, 229, 158, 190, 214, 181, 211, 85, 93, 172,
            161, 115, 74, 99, 165, 156, // end axpc hash
            65, 88, 67, 68, // axcd signature
            29, 87, 205, 69, 139, 92, 201, 89, // axcd hash
            248, 232, 221, 244, 67, 120, 231, 192, 229, 135, 200, 178, 242, 207, 83, 145, 88, 83,
            238, 30, 255, 54, 226, 31, // end axcd hash
            65, 88, 67, 84, // axct signature
            188, 251, 66, 139, 217, 90, 175, 33, // axct hash
            93, 159, 193, 116, 124, 19, 113, 188, 195, 138, 75, 212, 185, 133, 87, 115, 195, 93, 4,
            189, 198, 152, 59, 190, // end axct hash
            65, 88, 66, 77, // axbm signature
            228, 142, 202, 253, 204, 232, 223, 220, // axbm hash
            131, 162, 12, 252, 106, 74, 3, 180, 190, 71, 230, 173, 146, 218, 209, 13, 101, 4, 43,
            186, 70, 46, 196, 194, // end axbm hash
            65, 88, 67, 73, // axci signature
            175, 56, 231, 224, 95, 58, 68, 216, // axci hash
            201, 155, 33, 50, 3, 124, 19, 157, 149, 107, 194, 174, 170, 108, 34, 110, 128, 107,
            240, 29, 11, 129, 67, 233, // end axci hash
        ];
        let indirect_data = Payload::new(&DIGESTS).unwrap();
        let (rem, _res) = der_parser::parse_der(&indirect_data).unwrap();
        assert!(rem.is_empty());
        assert_eq!(indirect_data, orig_indirect_data);
    }
}
