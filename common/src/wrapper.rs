//! Parsing of securely wrapped keys for import.
//!
//! ```asn1
//! SecureKeyWrapper ::= SEQUENCE {
//!     version                   INTEGER, # Value 0
//!     encryptedTransportKey     OCTET_STRING,
//!     initializationVector      OCTET_STRING,
//!     keyDescription            KeyDescription,
//!     encryptedKey              OCTET_STRING,
//!     tag                       OCTET_STRING,
//! }
//!
//! KeyDescription ::= SEQUENCE {
//!     keyFormat    INTEGER, # Values from KeyFormat enum
//!     keyParams    AuthorizationList,
//! }
//! ```
//!
//! The AuthorizationList is re-expressed in the [`crate::params`] wire layout, since the TA
//! consumes parameters in that form.  Wrapped keys arrive from off-device, so every field is
//! validated before use.

use crate::der::{
    DerReader, TAG_BOOLEAN, TAG_ENUMERATED, TAG_INTEGER, TAG_NULL, TAG_OCTET_STRING, TAG_SEQUENCE,
};
use crate::{km_err, params, try_to_vec, Error, FallibleAllocExt};
use alloc::vec::Vec;
use der::{asn1::AnyRef, Decode, Encode, Sequence};
use log::{debug, warn};
use tkm_wire::keymint::{raw_tag_value, tag_type, KeyParamValue, KeyParameter, Tag, TagType};
use tkm_wire::tci::{WRAPPED_KEY_IV_MAX_LEN, WRAPPED_KEY_TAG_LEN};

/// Only supported version of the `SecureKeyWrapper` structure.
const SECURE_KEY_WRAPPER_VERSION: u8 = 0;

/// Fields of a parsed `SecureKeyWrapper`, borrowed from the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecureKeyWrapper<'a> {
    pub encrypted_transport_key: &'a [u8],
    pub initialization_vector: &'a [u8],
    /// Complete DER encoding of the keyDescription, including its SEQUENCE header.  The TA
    /// authenticates these exact bytes.
    pub key_description: &'a [u8],
    pub key_format: u32,
    /// Complete DER encoding of the AuthorizationList inside the keyDescription.
    pub authorization_list: &'a [u8],
    pub encrypted_key: &'a [u8],
    pub tag: &'a [u8],
}

/// DER encoding of `SecureKeyWrapper`, with the keyDescription carried as already-encoded
/// bytes.
#[derive(Sequence)]
struct WrapperEncoding<'a> {
    version: i32,
    #[asn1(type = "OCTET STRING")]
    encrypted_transport_key: &'a [u8],
    #[asn1(type = "OCTET STRING")]
    initialization_vector: &'a [u8],
    key_description: AnyRef<'a>,
    #[asn1(type = "OCTET STRING")]
    encrypted_key: &'a [u8],
    #[asn1(type = "OCTET STRING")]
    tag: &'a [u8],
}

/// DER encoding of `KeyDescription`, with the AuthorizationList carried as already-encoded
/// bytes.
#[derive(Sequence)]
struct KeyDescriptionEncoding<'a> {
    key_format: i32,
    key_params: AnyRef<'a>,
}

fn der_failure(e: der::Error) -> Error {
    km_err!(InvalidArgument, "DER encoding failed: {:?}", e)
}

impl<'a> SecureKeyWrapper<'a> {
    /// Re-encode the wrapper as DER.
    pub fn to_der(&self) -> Result<Vec<u8>, Error> {
        let key_description = AnyRef::from_der(self.key_description).map_err(der_failure)?;
        let encoding = WrapperEncoding {
            version: SECURE_KEY_WRAPPER_VERSION as i32,
            encrypted_transport_key: self.encrypted_transport_key,
            initialization_vector: self.initialization_vector,
            key_description,
            encrypted_key: self.encrypted_key,
            tag: self.tag,
        };
        encoding.to_der().map_err(der_failure)
    }
}

/// Encode a `KeyDescription` from a key format and a DER-encoded AuthorizationList.
pub fn encode_key_description(
    key_format: u32,
    authorization_list: &[u8],
) -> Result<Vec<u8>, Error> {
    let key_params = AnyRef::from_der(authorization_list).map_err(der_failure)?;
    let encoding = KeyDescriptionEncoding { key_format: key_format as i32, key_params };
    encoding.to_der().map_err(der_failure)
}

/// Parse a DER-encoded `SecureKeyWrapper`.  The outer SEQUENCE must cover the input exactly.
pub fn parse_secure_key_wrapper(data: &[u8]) -> Result<SecureKeyWrapper<'_>, Error> {
    let mut rdr = DerReader::new(data);
    let len = rdr.read_sequence_length()?;
    if len != rdr.remaining() {
        return Err(km_err!(
            InvalidArgument,
            "wrapper SEQUENCE of {} bytes in {} bytes of content",
            len,
            rdr.remaining()
        ));
    }

    rdr.expect_bytes(&[TAG_INTEGER, 1, SECURE_KEY_WRAPPER_VERSION])
        .map_err(|e| km_err!(InvalidArgument, "unsupported wrapper version: {:?}", e))?;
    let encrypted_transport_key = rdr.read_octet_string()?;
    let initialization_vector = rdr.read_octet_string()?;
    if initialization_vector.len() > WRAPPED_KEY_IV_MAX_LEN {
        return Err(km_err!(
            InvalidArgument,
            "IV of {} bytes exceeds {}",
            initialization_vector.len(),
            WRAPPED_KEY_IV_MAX_LEN
        ));
    }

    let before = rdr.rest();
    let mut desc = rdr.read_sequence()?;
    let key_description = &before[..before.len() - rdr.remaining()];
    desc.expect_bytes(&[TAG_INTEGER, 1])
        .map_err(|e| km_err!(InvalidArgument, "key format is not a single byte: {:?}", e))?;
    let key_format = desc.take(1)?[0] as u32;
    let authorization_list = desc.rest();

    let encrypted_key = rdr.read_octet_string()?;
    let tag = rdr.read_octet_string()?;
    if tag.len() != WRAPPED_KEY_TAG_LEN || !rdr.is_empty() {
        return Err(km_err!(
            InvalidArgument,
            "expected final {}-byte tag, got {} bytes with {} trailing",
            WRAPPED_KEY_TAG_LEN,
            tag.len(),
            rdr.remaining()
        ));
    }

    Ok(SecureKeyWrapper {
        encrypted_transport_key,
        initialization_vector,
        key_description,
        key_format,
        authorization_list,
        encrypted_key,
        tag,
    })
}

/// Handling of a repeated ALGORITHM or USER_SECURE_ID entry in an AuthorizationList.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepeatedTagPolicy {
    /// The last occurrence determines the extracted key type or secure user ID.
    #[default]
    LastWins,
    /// A repeat is rejected as `InvalidArgument`.
    Reject,
}

/// Expected DER content of an AuthorizationList entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    /// SET OF small INTEGER, one parameter per element.
    IntegerSet,
    /// INTEGER of at most 4 bytes.
    Integer32,
    /// INTEGER of at most 8 bytes.
    Integer64,
    /// NULL, indicating a true boolean.
    Null,
    /// RootOfTrust, validated but not emitted.
    RootOfTrust,
    OctetString,
}

/// Tags accepted in an AuthorizationList, in the ascending order in which they must appear.
const AUTHORIZATION_LIST_TAGS: &[(Tag, Shape)] = &[
    (Tag::Purpose, Shape::IntegerSet),
    (Tag::Algorithm, Shape::Integer32),
    (Tag::KeySize, Shape::Integer32),
    (Tag::BlockMode, Shape::IntegerSet),
    (Tag::Digest, Shape::IntegerSet),
    (Tag::Padding, Shape::IntegerSet),
    (Tag::CallerNonce, Shape::Null),
    (Tag::MinMacLength, Shape::Integer32),
    (Tag::EcCurve, Shape::Integer32),
    (Tag::RsaPublicExponent, Shape::Integer64),
    (Tag::RsaOaepMgfDigest, Shape::IntegerSet),
    (Tag::RollbackResistance, Shape::Null),
    (Tag::ActiveDatetime, Shape::Integer64),
    (Tag::OriginationExpireDatetime, Shape::Integer64),
    (Tag::UsageExpireDatetime, Shape::Integer64),
    (Tag::UserSecureId, Shape::Integer64),
    (Tag::NoAuthRequired, Shape::Null),
    (Tag::UserAuthType, Shape::Integer32),
    (Tag::AuthTimeout, Shape::Integer32),
    (Tag::AllowWhileOnBody, Shape::Null),
    (Tag::TrustedUserPresenceRequired, Shape::Null),
    (Tag::TrustedConfirmationRequired, Shape::Null),
    (Tag::UnlockedDeviceRequired, Shape::Null),
    (Tag::CreationDatetime, Shape::Integer64),
    (Tag::Origin, Shape::Integer32),
    (Tag::RootOfTrust, Shape::RootOfTrust),
    (Tag::OsVersion, Shape::Integer32),
    (Tag::OsPatchlevel, Shape::Integer32),
    (Tag::AttestationApplicationId, Shape::OctetString),
    (Tag::AttestationIdBrand, Shape::OctetString),
    (Tag::AttestationIdDevice, Shape::OctetString),
    (Tag::AttestationIdProduct, Shape::OctetString),
    (Tag::AttestationIdSerial, Shape::OctetString),
    (Tag::AttestationIdImei, Shape::OctetString),
    (Tag::AttestationIdMeid, Shape::OctetString),
    (Tag::AttestationIdManufacturer, Shape::OctetString),
    (Tag::AttestationIdModel, Shape::OctetString),
    (Tag::VendorPatchlevel, Shape::Integer32),
    (Tag::BootPatchlevel, Shape::Integer32),
];

/// Length of an encoded RootOfTrust whose verifiedBootKey is 32 bytes.
const ROOT_OF_TRUST_LEN: usize = 42;

/// Result of parsing an AuthorizationList.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAuthorizations {
    /// The parameters, serialized in the [`crate::params`] wire layout.
    pub key_params: Vec<u8>,
    /// Raw value of the ALGORITHM entry, or 0 if absent.
    pub key_type: u32,
    /// Value of the USER_SECURE_ID entry, or 0 if absent.
    pub secure_user_id: u64,
}

/// Big-endian value of the content of a non-negative DER INTEGER of at most `max_len` bytes.
fn integer_value(item: &[u8], max_len: usize) -> Result<u64, Error> {
    let mut rdr = DerReader::new(item);
    let content = rdr.read_integer()?;
    if content.len() > max_len || !rdr.is_empty() {
        return Err(km_err!(
            InvalidArgument,
            "INTEGER of {} bytes (max {}) with {} trailing",
            content.len(),
            max_len,
            rdr.remaining()
        ));
    }
    Ok(content.iter().fold(0u64, |v, b| (v << 8) | *b as u64))
}

fn check_root_of_trust(item: &[u8]) -> Result<(), Error> {
    let well_formed = item.len() == ROOT_OF_TRUST_LEN
        && item[0] == TAG_SEQUENCE
        && item[1] == 40
        && item[2] == TAG_OCTET_STRING
        && item[3] == 32
        && item[36] == TAG_BOOLEAN
        && item[37] == 1
        && item[39] == TAG_ENUMERATED
        && item[40] == 1;
    if !well_formed {
        return Err(km_err!(InvalidArgument, "malformed RootOfTrust of {} bytes", item.len()));
    }
    Ok(())
}

/// Append the parameters held by a single AuthorizationList entry.
fn push_item(
    results: &mut Vec<KeyParameter>,
    tag: Tag,
    shape: Shape,
    item: &[u8],
) -> Result<(), Error> {
    match shape {
        Shape::IntegerSet => {
            let mut rdr = DerReader::new(item);
            let len = rdr.read_set_length()?;
            if len != rdr.remaining() || len % 3 != 0 {
                return Err(km_err!(InvalidArgument, "malformed SET of {} bytes for {:?}", len, tag));
            }
            while !rdr.is_empty() {
                rdr.expect_bytes(&[TAG_INTEGER, 1])?;
                let v = rdr.take(1)?[0] as u32;
                results.try_push(KeyParameter::new(tag, enum_value(v)))?;
            }
        }
        Shape::Integer32 => {
            let v = integer_value(item, 4)? as u32;
            let value = match tag_type(tag) {
                TagType::Enum => enum_value(v),
                _ => KeyParamValue::UInt(v),
            };
            results.try_push(KeyParameter::new(tag, value))?;
        }
        Shape::Integer64 => {
            let v = integer_value(item, 8)?;
            let param = match tag_type(tag) {
                TagType::Date => KeyParameter::date(tag, v),
                _ => KeyParameter::ulong(tag, v),
            };
            results.try_push(param)?;
        }
        Shape::Null => {
            if item != &[TAG_NULL, 0x00][..] {
                return Err(km_err!(InvalidArgument, "expected NULL for {:?}", tag));
            }
            results.try_push(KeyParameter::flag(tag))?;
        }
        Shape::RootOfTrust => check_root_of_trust(item)?,
        Shape::OctetString => {
            let mut rdr = DerReader::new(item);
            let content = rdr.read_octet_string()?;
            if !rdr.is_empty() {
                return Err(km_err!(InvalidArgument, "trailing data after {:?}", tag));
            }
            results.try_push(KeyParameter::bytes(tag, try_to_vec(content)?))?;
        }
    }
    Ok(())
}

fn enum_value(v: u32) -> KeyParamValue {
    KeyParamValue::Enum(v)
}

/// Parse a DER-encoded AuthorizationList into KeyParameters, checking each entry against the
/// table of accepted tags.
pub fn parse_authorization_params(
    data: &[u8],
    policy: RepeatedTagPolicy,
) -> Result<(Vec<KeyParameter>, u32, u64), Error> {
    let mut rdr = DerReader::new(data);
    let len = rdr.read_sequence_length()?;
    if len != rdr.remaining() {
        return Err(km_err!(
            InvalidArgument,
            "AuthorizationList SEQUENCE of {} bytes in {} bytes of content",
            len,
            rdr.remaining()
        ));
    }

    let mut results = Vec::new();
    let mut key_type = None;
    let mut secure_user_id = None;
    let mut idx = 0;
    while !rdr.is_empty() {
        let (tag_num, item_len) = rdr.read_explicit_tag_and_length()?;
        let item = rdr.take(item_len)?;

        // Entries appear in ascending tag order, so the search resumes from the last match.
        while idx < AUTHORIZATION_LIST_TAGS.len()
            && raw_tag_value(AUTHORIZATION_LIST_TAGS[idx].0) != tag_num
        {
            idx += 1;
        }
        let (tag, shape) = match AUTHORIZATION_LIST_TAGS.get(idx) {
            Some(entry) => *entry,
            None => {
                return Err(km_err!(
                    InvalidArgument,
                    "tag [{}] not accepted at this position in AuthorizationList",
                    tag_num
                ))
            }
        };

        let before = results.len();
        push_item(&mut results, tag, shape, item)?;
        match tag {
            Tag::Algorithm => record(&mut key_type, &results[before..], tag, policy)?,
            Tag::UserSecureId => record(&mut secure_user_id, &results[before..], tag, policy)?,
            _ => {}
        }
    }
    debug!("AuthorizationList holds {} parameters", results.len());
    Ok((results, key_type.unwrap_or(0) as u32, secure_user_id.unwrap_or(0)))
}

/// Capture the scalar value of a newly parsed ALGORITHM or USER_SECURE_ID entry.
fn record(
    slot: &mut Option<u64>,
    added: &[KeyParameter],
    tag: Tag,
    policy: RepeatedTagPolicy,
) -> Result<(), Error> {
    let value = match added.first().map(|p| &p.value) {
        Some(KeyParamValue::Enum(v)) => *v as u64,
        Some(KeyParamValue::ULong(v)) => *v,
        _ => return Err(km_err!(InvalidArgument, "no value captured for {:?}", tag)),
    };
    if slot.is_some() {
        match policy {
            RepeatedTagPolicy::LastWins => warn!("repeated {:?} in AuthorizationList", tag),
            RepeatedTagPolicy::Reject => {
                return Err(km_err!(InvalidArgument, "repeated {:?} in AuthorizationList", tag))
            }
        }
    }
    *slot = Some(value);
    Ok(())
}

/// Parse a DER-encoded AuthorizationList and serialize its contents in the TA parameter
/// layout, extracting the key type and secure user ID along the way.
pub fn parse_authorization_list(
    data: &[u8],
    policy: RepeatedTagPolicy,
) -> Result<ParsedAuthorizations, Error> {
    let (parsed, key_type, secure_user_id) = parse_authorization_params(data, policy)?;
    let key_params = params::serialize(&parsed, None, None)?;
    Ok(ParsedAuthorizations { key_params, key_type, secure_user_id })
}
