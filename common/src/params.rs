//! Parameter Codec: the flat little-endian key parameter layout exchanged with the TA.
//!
//! ```text
//! [0..4]              Count N of serialized parameters.
//! Followed by N entries, each:
//!   [0..4]            Raw tag value.
//!   [4..8]            u32 value (`TagType::Enum[Rep]`, `TagType::Uint[Rep]`; 1 for `TagType::Bool`)
//!   [4..12]           u64 value (`TagType::Ulong[Rep]`, `TagType::Date`)
//!   [4..8] + [8..8+L] Length L then raw bytes (`TagType::Bytes`, `TagType::Bignum`)
//! ```
//!
//! All integers are little-endian.  Serialization runs in two passes, the first of which
//! computes the exact size and count, so that the output buffer is allocated once.

use crate::{km_err, try_to_vec, vec_try_with_capacity, Error, FallibleAllocExt};
use alloc::vec::Vec;
use log::debug;
use tkm_wire::keymint::{raw_tag_type, tag_type, KeyParamValue, KeyParameter, Tag, TagType};

/// Size of the leading parameter count.
const COUNT_SIZE: usize = 4;
/// Size of the tag that starts every entry.
const TAG_SIZE: usize = 4;
/// Size of the length prefix of a byte-string value.
const LEN_SIZE: usize = 4;

/// Indicate whether the TA accepts `tag` in a serialized parameter set.
///
/// Every tag known to this crate qualifies except `Tag::AssociatedData`, which is carried
/// separately from the rest of the parameters (see [`serialize_with_aad`]).
pub fn is_tag_known(tag: Tag) -> bool {
    !matches!(tag, Tag::Invalid | Tag::AssociatedData)
}

/// Serialized size of the value of `param`, excluding its tag.
fn value_size(param: &KeyParameter) -> Result<usize, Error> {
    match (tag_type(param.tag), &param.value) {
        (TagType::Enum | TagType::EnumRep, KeyParamValue::Enum(_))
        | (TagType::Uint | TagType::UintRep, KeyParamValue::UInt(_))
        | (TagType::Bool, KeyParamValue::Bool(_)) => Ok(4),
        (TagType::Ulong | TagType::UlongRep, KeyParamValue::ULong(_))
        | (TagType::Date, KeyParamValue::DateTime(_)) => Ok(8),
        (TagType::Bignum | TagType::Bytes, KeyParamValue::Bytes(v)) => {
            if u32::try_from(v.len()).is_err() {
                return Err(km_err!(
                    InvalidArgument,
                    "{:?} value of {} bytes",
                    param.tag,
                    v.len()
                ));
            }
            Ok(LEN_SIZE + v.len())
        }
        (tt, _) => {
            Err(km_err!(InvalidTag, "value of {:?} does not match type {:?}", param.tag, tt))
        }
    }
}

/// Indicate whether `param` produces an entry.  A boolean tag is true by presence alone, so a
/// false one is left out.
fn is_emitted(param: &KeyParameter) -> bool {
    is_tag_known(param.tag)
        && !(tag_type(param.tag) == TagType::Bool && param.value == KeyParamValue::Bool(false))
}

fn checked_add(a: usize, b: usize) -> Result<usize, Error> {
    a.checked_add(b).ok_or_else(|| km_err!(InvalidArgument, "parameter set size overflow"))
}

/// First serialization pass: return the number of parameters that will be emitted and the exact
/// size of the serialized form, including the leading count.
///
/// Tags outside the recognized table are skipped, as are boolean tags set to false.
/// `extra_key_size` and `extra_rsa_exponent`
/// each add one parameter if supplied and the corresponding tag is absent from `params`.
pub fn serialized_size(
    params: &[KeyParameter],
    extra_key_size: Option<u32>,
    extra_rsa_exponent: Option<u64>,
) -> Result<(u32, usize), Error> {
    let mut count = 0u32;
    let mut size = COUNT_SIZE;
    for param in params.iter().filter(|p| is_emitted(p)) {
        size = checked_add(size, TAG_SIZE + value_size(param)?)?;
        count += 1;
    }
    if extra_key_size.is_some() && !contains(params, Tag::KeySize) {
        size = checked_add(size, TAG_SIZE + 4)?;
        count += 1;
    }
    if extra_rsa_exponent.is_some() && !contains(params, Tag::RsaPublicExponent) {
        size = checked_add(size, TAG_SIZE + 8)?;
        count += 1;
    }
    Ok((count, size))
}

fn contains(params: &[KeyParameter], tag: Tag) -> bool {
    params.iter().any(|p| p.tag == tag)
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) -> Result<(), Error> {
    buf.try_extend_from_slice(&v.to_le_bytes())?;
    Ok(())
}

fn put_u64(buf: &mut Vec<u8>, v: u64) -> Result<(), Error> {
    buf.try_extend_from_slice(&v.to_le_bytes())?;
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, v: &[u8]) -> Result<(), Error> {
    put_u32(buf, v.len() as u32)?;
    buf.try_extend_from_slice(v)?;
    Ok(())
}

/// Append a single parameter, whose value is known to be consistent with its tag.
fn put_param(buf: &mut Vec<u8>, param: &KeyParameter) -> Result<(), Error> {
    put_u32(buf, param.tag.raw())?;
    match &param.value {
        KeyParamValue::Enum(v) | KeyParamValue::UInt(v) => put_u32(buf, *v),
        KeyParamValue::Bool(_) => put_u32(buf, 1),
        KeyParamValue::ULong(v) | KeyParamValue::DateTime(v) => put_u64(buf, *v),
        KeyParamValue::Bytes(v) => put_bytes(buf, v),
    }
}

/// Serialize `params` into the TA layout, appending a `Tag::KeySize` and/or
/// `Tag::RsaPublicExponent` parameter after the others when supplied and not already present.
pub fn serialize(
    params: &[KeyParameter],
    extra_key_size: Option<u32>,
    extra_rsa_exponent: Option<u64>,
) -> Result<Vec<u8>, Error> {
    serialize_internal(params, extra_key_size, extra_rsa_exponent, None)
}

/// Serialize `params` followed by a `Tag::AssociatedData` entry holding `aad`, if present.
///
/// Any associated data already in `params` is skipped, so the caller controls exactly which
/// slice of it travels with each chunk.
pub fn serialize_with_aad(
    params: &[KeyParameter],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    serialize_internal(params, None, None, aad)
}

fn serialize_internal(
    params: &[KeyParameter],
    extra_key_size: Option<u32>,
    extra_rsa_exponent: Option<u64>,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let (mut count, mut size) = serialized_size(params, extra_key_size, extra_rsa_exponent)?;
    if let Some(aad) = aad {
        if u32::try_from(aad.len()).is_err() {
            return Err(km_err!(InvalidArgument, "associated data of {} bytes", aad.len()));
        }
        size = checked_add(size, TAG_SIZE + LEN_SIZE + aad.len())?;
        count += 1;
    }

    let mut result = vec_try_with_capacity!(size)?;
    put_u32(&mut result, count)?;
    for param in params.iter().filter(|p| is_emitted(p)) {
        put_param(&mut result, param)?;
    }
    if let Some(key_size) = extra_key_size {
        if !contains(params, Tag::KeySize) {
            put_u32(&mut result, Tag::KeySize.raw())?;
            put_u32(&mut result, key_size)?;
        }
    }
    if let Some(exponent) = extra_rsa_exponent {
        if !contains(params, Tag::RsaPublicExponent) {
            put_u32(&mut result, Tag::RsaPublicExponent.raw())?;
            put_u64(&mut result, exponent)?;
        }
    }
    if let Some(aad) = aad {
        put_u32(&mut result, Tag::AssociatedData.raw())?;
        put_bytes(&mut result, aad)?;
    }

    if result.len() != size {
        return Err(km_err!(
            UnknownError,
            "serialized {} bytes of parameters, expected {}",
            result.len(),
            size
        ));
    }
    debug!("serialized {} parameters into {} bytes", count, size);
    Ok(result)
}

/// Retrieve `N` bytes from the start of the given slice, if possible.
fn consume_array<const N: usize>(data: &mut &[u8]) -> Result<[u8; N], Error> {
    if data.len() < N {
        return Err(km_err!(InsufficientBufferSpace, "failed to find {} bytes", N));
    }
    let (head, tail) = data.split_at(N);
    let mut chunk = [0u8; N];
    chunk.copy_from_slice(head);
    *data = tail;
    Ok(chunk)
}

/// Retrieve a little-endian `u32` from the start of the given slice, if possible.
pub(crate) fn consume_u32(data: &mut &[u8]) -> Result<u32, Error> {
    Ok(u32::from_le_bytes(consume_array::<4>(data)?))
}

/// Retrieve a little-endian `u64` from the start of the given slice, if possible.
pub(crate) fn consume_u64(data: &mut &[u8]) -> Result<u64, Error> {
    Ok(u64::from_le_bytes(consume_array::<8>(data)?))
}

/// Retrieve a vector of bytes from the start of the given slice, if possible, with the length
/// of the data given by a little-endian `u32` prefix.
pub(crate) fn consume_vec(data: &mut &[u8]) -> Result<Vec<u8>, Error> {
    let len = consume_u32(data)? as usize;
    if len > data.len() {
        return Err(km_err!(InsufficientBufferSpace, "failed to find {} bytes", len));
    }
    let result = try_to_vec(&data[..len])?;
    *data = &(*data)[len..];
    Ok(result)
}

/// Deserialize a parameter set from the start of `data`, which is advanced past it.
pub fn consume_param_set(data: &mut &[u8]) -> Result<Vec<KeyParameter>, Error> {
    let count = consume_u32(data)? as usize;
    // Every entry occupies at least 8 bytes, so a bogus count cannot force a huge reservation.
    let mut results = vec_try_with_capacity!(core::cmp::min(count, data.len() / 8))?;
    for _i in 0..count {
        let raw = consume_u32(data)?;
        let tt = raw_tag_type(raw);
        if tt == TagType::Invalid {
            return Err(km_err!(UnsupportedTag, "tag {:#010x} has unknown type", raw));
        }
        let tag = Tag::from_raw(raw)
            .ok_or_else(|| km_err!(UnsupportedTag, "unknown tag {:#010x} encountered", raw))?;
        let value = match tt {
            TagType::Enum | TagType::EnumRep => KeyParamValue::Enum(consume_u32(data)?),
            TagType::Uint | TagType::UintRep => KeyParamValue::UInt(consume_u32(data)?),
            TagType::Bool => {
                // Presence is what counts; the value word carries no information.
                consume_u32(data)?;
                KeyParamValue::Bool(true)
            }
            TagType::Ulong | TagType::UlongRep => KeyParamValue::ULong(consume_u64(data)?),
            TagType::Date => KeyParamValue::DateTime(consume_u64(data)?),
            TagType::Bignum | TagType::Bytes => KeyParamValue::Bytes(consume_vec(data)?),
            TagType::Invalid => {
                return Err(km_err!(UnsupportedTag, "tag {:#010x} has unknown type", raw))
            }
        };
        results.try_push(KeyParameter::new(tag, value))?;
    }
    Ok(results)
}

/// Deserialize a parameter set.  Bytes after the last parameter are ignored.
pub fn deserialize(data: &[u8]) -> Result<Vec<KeyParameter>, Error> {
    let mut data = data;
    let params = consume_param_set(&mut data)?;
    debug!("deserialized {} parameters", params.len());
    Ok(params)
}

/// Deserialize key characteristics, held as two consecutive parameter sets: hardware-enforced
/// first, then software-enforced.
pub fn deserialize_characteristics(
    data: &[u8],
) -> Result<(Vec<KeyParameter>, Vec<KeyParameter>), Error> {
    let mut data = data;
    let hw_enforced = consume_param_set(&mut data)?;
    let sw_enforced = consume_param_set(&mut data)?;
    Ok((hw_enforced, sw_enforced))
}

/// Deserialize a certificate chain: a count, then each certificate with a length prefix.
pub fn deserialize_cert_chain(data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let mut data = data;
    let count = consume_u32(&mut data)? as usize;
    let mut certs = vec_try_with_capacity!(core::cmp::min(count, data.len() / 4))?;
    for i in 0..count {
        let cert = consume_vec(&mut data)?;
        if cert.is_empty() {
            return Err(km_err!(UnknownError, "certificate {} of {} is empty", i, count));
        }
        certs.try_push(cert)?;
    }
    Ok(certs)
}

/// Return the value of the first enumerated parameter with the given tag.
pub fn find_enum(params: &[KeyParameter], tag: Tag) -> Option<u32> {
    params.iter().find(|p| p.tag == tag).and_then(|p| match p.value {
        KeyParamValue::Enum(v) => Some(v),
        _ => None,
    })
}

/// Return the value of the first 32-bit integer parameter with the given tag.
pub fn find_uint(params: &[KeyParameter], tag: Tag) -> Option<u32> {
    params.iter().find(|p| p.tag == tag).and_then(|p| match p.value {
        KeyParamValue::UInt(v) => Some(v),
        _ => None,
    })
}

/// Return the value of the first 64-bit integer or date parameter with the given tag.
pub fn find_ulong(params: &[KeyParameter], tag: Tag) -> Option<u64> {
    params.iter().find(|p| p.tag == tag).and_then(|p| match p.value {
        KeyParamValue::ULong(v) | KeyParamValue::DateTime(v) => Some(v),
        _ => None,
    })
}

pub fn find_bytes(params: &[KeyParameter], tag: Tag) -> Option<&[u8]> {
    params.iter().find(|p| p.tag == tag).and_then(|p| match &p.value {
        KeyParamValue::Bytes(v) => Some(v.as_slice()),
        _ => None,
    })
}
