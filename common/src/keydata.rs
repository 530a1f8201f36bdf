//! Conversion between external key formats and the TA's key data layout.
//!
//! All integers in the TA layout are little-endian `u32`s.  Imported key data:
//!
//! ```text
//! RSA:        alg | bits | bits | len(n) len(e) len(d) len(p) len(q) len(dp) len(dq) len(qinv)
//!             | n | e | d | p | q | dp | dq | qinv
//! EC (NIST):  alg | bits | curve | len(x) | len(y) | len(d) | x | y | d
//! Curve25519: alg | 256 | curve | public key (zeroes) | private key
//! Symmetric:  alg | bits | key
//! ```
//!
//! Exported public key data:
//!
//! ```text
//! RSA:        alg | bits | bits | len(n) | len(e) | n | e
//! EC (NIST):  alg | bits | curve | len(x) | len(y) | x | y
//! ```

use crate::params::{consume_u32, put_u32};
use crate::{km_err, try_to_vec, vec_try_with_capacity, Error, FallibleAllocExt};
use alloc::vec::Vec;
use core::fmt;
use der::{
    asn1::{AnyRef, BitStringRef, UintRef},
    Decode, Encode,
};
use pkcs8::{ObjectIdentifier, PrivateKeyInfo};
use spki::{AlgorithmIdentifierRef, SubjectPublicKeyInfoRef};
use tkm_wire::keymint::{Algorithm, EcCurve, KeyFormat};
use zeroize::ZeroizeOnDrop;

/// Length in bytes of a Curve25519 public or private key.
pub const CURVE25519_KEY_LEN: usize = 32;

/// OID value for an RSA public key, RFC 3279 s2.3.1.
pub const X509_RSA_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// OID value for a NIST curve EC public key, RFC 5480 s2.1.1.
pub const X509_NIST_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// OID value for an Ed25519 key, RFC 8410 s3.
pub const X509_ED25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// OID value for an X25519 key, RFC 8410 s3.
pub const X509_X25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.110");

/// OID value for the P-224 curve, RFC 5480 s2.1.1.1.
pub const ALGO_PARAM_P224_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.33");

/// OID value for the P-256 curve.
pub const ALGO_PARAM_P256_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// OID value for the P-384 curve.
pub const ALGO_PARAM_P384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// OID value for the P-521 curve.
pub const ALGO_PARAM_P521_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

/// Curve identifiers used inside the TA's key data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TaCurve {
    P224 = 2,
    P256 = 3,
    P384 = 4,
    P521 = 5,
    Curve25519 = 0x300,
}

impl TaCurve {
    /// Curve size in bits.
    pub fn bits(self) -> u32 {
        match self {
            TaCurve::P224 => 224,
            TaCurve::P256 => 256,
            TaCurve::P384 => 384,
            TaCurve::P521 => 521,
            TaCurve::Curve25519 => 256,
        }
    }

    /// Length in bytes of a field element.
    pub fn coord_len(self) -> usize {
        (self.bits() as usize + 7) / 8
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            2 => Some(TaCurve::P224),
            3 => Some(TaCurve::P256),
            4 => Some(TaCurve::P384),
            5 => Some(TaCurve::P521),
            0x300 => Some(TaCurve::Curve25519),
            _ => None,
        }
    }

    fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        match oid {
            ALGO_PARAM_P224_OID => Some(TaCurve::P224),
            ALGO_PARAM_P256_OID => Some(TaCurve::P256),
            ALGO_PARAM_P384_OID => Some(TaCurve::P384),
            ALGO_PARAM_P521_OID => Some(TaCurve::P521),
            _ => None,
        }
    }

    /// Named curve OID, for NIST curves only.
    fn oid(self) -> Option<ObjectIdentifier> {
        match self {
            TaCurve::P224 => Some(ALGO_PARAM_P224_OID),
            TaCurve::P256 => Some(ALGO_PARAM_P256_OID),
            TaCurve::P384 => Some(ALGO_PARAM_P384_OID),
            TaCurve::P521 => Some(ALGO_PARAM_P521_OID),
            TaCurve::Curve25519 => None,
        }
    }
}

/// Key data in the TA layout.  Holds private key material, so is zeroed on drop.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct KeyData(Vec<u8>);

impl KeyData {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyData {{ len: {} }}", self.0.len())
    }
}

fn der_failure(e: der::Error) -> Error {
    km_err!(UnknownError, "failed to DER-encode public key: {:?}", e)
}

fn private_key_info(data: &[u8]) -> Result<PrivateKeyInfo<'_>, Error> {
    PrivateKeyInfo::try_from(data)
        .map_err(|e| km_err!(InvalidArgument, "failed to parse PKCS#8 key: {:?}", e))
}

/// Convert a PKCS#8-wrapped `ECPrivateKey` (RFC 5915) on a NIST curve.  The embedded public key
/// is required, as the TA does not recompute it.
fn decode_pkcs8_ec(data: &[u8]) -> Result<KeyData, Error> {
    let key_info = private_key_info(data)?;
    if key_info.algorithm.oid != X509_NIST_OID {
        return Err(km_err!(
            InvalidArgument,
            "unexpected OID {:?} for PKCS#8 EC key import",
            key_info.algorithm.oid
        ));
    }
    let curve_oid = key_info
        .algorithm
        .parameters_oid()
        .map_err(|_e| km_err!(InvalidArgument, "missing PKCS#8 parameters for NIST curve"))?;
    let curve = TaCurve::from_oid(curve_oid)
        .ok_or_else(|| km_err!(InvalidArgument, "unknown EC curve {:?}", curve_oid))?;
    let clen = curve.coord_len();

    let ec_key = sec1::EcPrivateKey::from_der(key_info.private_key)
        .map_err(|e| km_err!(InvalidArgument, "failed to parse ECPrivateKey: {:?}", e))?;
    if let Some(params) = ec_key.parameters {
        if params.named_curve() != Some(curve_oid) {
            return Err(km_err!(InvalidArgument, "inconsistent curve in ECPrivateKey"));
        }
    }
    if ec_key.private_key.len() != clen {
        return Err(km_err!(
            InvalidArgument,
            "private key length {} for {:?}",
            ec_key.private_key.len(),
            curve
        ));
    }
    let point = ec_key
        .public_key
        .ok_or_else(|| km_err!(InvalidArgument, "missing public key in ECPrivateKey"))?;
    let point = match point.split_first() {
        Some((0x04, xy)) if xy.len() == 2 * clen => xy,
        _ => {
            return Err(km_err!(
                InvalidArgument,
                "public key is not an uncompressed point on {:?}",
                curve
            ))
        }
    };

    let mut out = vec_try_with_capacity!(24 + 3 * clen)?;
    put_u32(&mut out, Algorithm::Ec as u32)?;
    put_u32(&mut out, curve.bits())?;
    put_u32(&mut out, curve as u32)?;
    for _ in 0..3 {
        put_u32(&mut out, clen as u32)?;
    }
    out.try_extend_from_slice(point)?;
    out.try_extend_from_slice(ec_key.private_key)?;
    Ok(KeyData(out))
}

/// Key data for a Curve25519 key; the TA derives the public key itself.
fn curve25519_key_data(private_key: &[u8]) -> Result<KeyData, Error> {
    let mut out = vec_try_with_capacity!(12 + 2 * CURVE25519_KEY_LEN)?;
    put_u32(&mut out, Algorithm::Ec as u32)?;
    put_u32(&mut out, TaCurve::Curve25519.bits())?;
    put_u32(&mut out, TaCurve::Curve25519 as u32)?;
    out.try_extend_from_slice(&[0u8; CURVE25519_KEY_LEN])?;
    out.try_extend_from_slice(private_key)?;
    Ok(KeyData(out))
}

fn decode_pkcs8_25519(data: &[u8], x25519: bool) -> Result<KeyData, Error> {
    let key_info = private_key_info(data)?;
    match key_info.algorithm.oid {
        X509_ED25519_OID if x25519 => {
            return Err(km_err!(InvalidArgument, "Ed25519 key imported for X25519"))
        }
        X509_X25519_OID if !x25519 => {
            return Err(km_err!(InvalidArgument, "X25519 key imported for Ed25519"))
        }
        X509_ED25519_OID | X509_X25519_OID => {}
        oid => {
            return Err(km_err!(InvalidArgument, "unexpected OID {:?} for Curve25519 import", oid))
        }
    }
    if key_info.algorithm.parameters.is_some() {
        return Err(km_err!(InvalidArgument, "unexpected PKCS#8 parameters for Curve25519 import"));
    }
    // The PKCS#8 `privateKey` field holds a `CurvePrivateKey` (RFC 8410 s7) that is an OCTET
    // STRING holding the raw key.  As this is DER, this is just a 2 byte prefix (0x04 = OCTET
    // STRING, 0x20 = length of raw key).
    match key_info.private_key {
        [0x04, 0x20, key @ ..] if key.len() == CURVE25519_KEY_LEN => curve25519_key_data(key),
        _ => Err(km_err!(InvalidArgument, "unexpected CurvePrivateKey contents")),
    }
}

/// Convert a PKCS#8-wrapped `RSAPrivateKey` (RFC 8017 A.1.2).  Integers are stored without sign
/// padding.
fn decode_pkcs8_rsa(data: &[u8]) -> Result<KeyData, Error> {
    let key_info = private_key_info(data)?;
    if key_info.algorithm.oid != X509_RSA_OID {
        return Err(km_err!(
            InvalidArgument,
            "unexpected OID {:?} for PKCS#8 RSA key import",
            key_info.algorithm.oid
        ));
    }
    if key_info.algorithm.parameters != Some(AnyRef::NULL) {
        return Err(km_err!(InvalidArgument, "missing NULL parameters for RSA key"));
    }
    let rsa_key = pkcs1::RsaPrivateKey::from_der(key_info.private_key)
        .map_err(|e| km_err!(InvalidArgument, "failed to parse RSAPrivateKey: {:?}", e))?;
    if rsa_key.version() != pkcs1::Version::TwoPrime {
        return Err(km_err!(InvalidArgument, "multi-prime RSA keys not supported"));
    }
    let fields = [
        rsa_key.modulus,
        rsa_key.public_exponent,
        rsa_key.private_exponent,
        rsa_key.prime1,
        rsa_key.prime2,
        rsa_key.exponent1,
        rsa_key.exponent2,
        rsa_key.coefficient,
    ];

    let n_len = fields[0].as_bytes().len();
    let total = 44 + fields.iter().map(|f| f.as_bytes().len()).sum::<usize>();
    let mut out = vec_try_with_capacity!(total)?;
    put_u32(&mut out, Algorithm::Rsa as u32)?;
    put_u32(&mut out, 8 * n_len as u32)?;
    put_u32(&mut out, 8 * n_len as u32)?;
    for field in &fields {
        put_u32(&mut out, field.as_bytes().len() as u32)?;
    }
    for field in &fields {
        out.try_extend_from_slice(field.as_bytes())?;
    }
    Ok(KeyData(out))
}

/// Convert imported key material into the TA key data layout.
///
/// PKCS#8 input is accepted for EC (NIST curves, or Ed25519/X25519 when `ec_curve` is
/// Curve25519) and RSA keys.  RAW input is accepted for symmetric keys and for Curve25519
/// private keys.
pub fn decode_key_data(
    key_format: KeyFormat,
    algorithm: Algorithm,
    ec_curve: Option<EcCurve>,
    x25519: bool,
    data: &[u8],
) -> Result<KeyData, Error> {
    match (key_format, algorithm) {
        (KeyFormat::Pkcs8, Algorithm::Ec) if ec_curve == Some(EcCurve::Curve25519) => {
            decode_pkcs8_25519(data, x25519)
        }
        (KeyFormat::Pkcs8, Algorithm::Ec) => decode_pkcs8_ec(data),
        (KeyFormat::Pkcs8, Algorithm::Rsa) => decode_pkcs8_rsa(data),
        (KeyFormat::Pkcs8, _) => {
            Err(km_err!(IncompatibleAlgorithm, "PKCS#8 import of {:?} key", algorithm))
        }
        (KeyFormat::Raw, Algorithm::Ec) => {
            if ec_curve != Some(EcCurve::Curve25519) {
                return Err(km_err!(IncompatibleAlgorithm, "raw EC import needs Curve25519"));
            }
            if data.len() != CURVE25519_KEY_LEN {
                return Err(km_err!(InvalidArgument, "raw Curve25519 key of {} bytes", data.len()));
            }
            curve25519_key_data(data)
        }
        (KeyFormat::Raw, Algorithm::Aes | Algorithm::TripleDes | Algorithm::Hmac) => {
            let mut out = vec_try_with_capacity!(8 + data.len())?;
            put_u32(&mut out, algorithm as u32)?;
            put_u32(&mut out, 8 * data.len() as u32)?;
            out.try_extend_from_slice(data)?;
            Ok(KeyData(out))
        }
        (KeyFormat::Raw, _) => {
            Err(km_err!(IncompatibleAlgorithm, "raw import of {:?} key", algorithm))
        }
        (KeyFormat::X509, _) => Err(km_err!(UnsupportedKeyFormat, "cannot import X.509 keys")),
    }
}

/// Split exported public key data into its size word, its third header word and the two
/// variable-length values that follow the header.
fn split_export_data(
    algorithm: Algorithm,
    data: &[u8],
) -> Result<(u32, u32, &[u8], &[u8]), Error> {
    let mut rest = data;
    let key_type = consume_u32(&mut rest)?;
    let key_size = consume_u32(&mut rest)?;
    let third = consume_u32(&mut rest)?;
    let first_len = consume_u32(&mut rest)? as usize;
    let second_len = consume_u32(&mut rest)? as usize;
    if key_type != algorithm as u32 {
        return Err(km_err!(
            InvalidArgument,
            "exported key data of type {} for {:?} key",
            key_type,
            algorithm
        ));
    }
    if first_len.checked_add(second_len).map_or(true, |l| l > rest.len()) {
        return Err(km_err!(
            InvalidArgument,
            "exported values of {} + {} bytes overrun {} bytes",
            first_len,
            second_len,
            rest.len()
        ));
    }
    let (first, rest) = rest.split_at(first_len);
    Ok((key_size, third, first, &rest[..second_len]))
}

/// Append `value` left-padded with zeroes to `len` bytes.
fn put_padded(buf: &mut Vec<u8>, value: &[u8], len: usize) -> Result<(), Error> {
    if value.len() > len {
        return Err(km_err!(InvalidArgument, "coordinate of {} bytes, max {}", value.len(), len));
    }
    for _ in value.len()..len {
        buf.try_push(0)?;
    }
    buf.try_extend_from_slice(value)?;
    Ok(())
}

/// Build a DER-encoded `SubjectPublicKeyInfo` (RFC 5280 s4.1).
fn subject_public_key_info(
    algorithm: AlgorithmIdentifierRef<'_>,
    subject_public_key: &[u8],
) -> Result<Vec<u8>, Error> {
    let spki = SubjectPublicKeyInfoRef {
        algorithm,
        subject_public_key: BitStringRef::from_bytes(subject_public_key).map_err(der_failure)?,
    };
    spki.to_der().map_err(der_failure)
}

fn encode_rsa_x509(data: &[u8]) -> Result<Vec<u8>, Error> {
    let (_key_size, _key_size_again, n, e) = split_export_data(Algorithm::Rsa, data)?;
    let rsa_pub_key = pkcs1::RsaPublicKey {
        modulus: UintRef::new(n).map_err(der_failure)?,
        public_exponent: UintRef::new(e).map_err(der_failure)?,
    };
    let rsa_pub_key = rsa_pub_key.to_der().map_err(der_failure)?;
    subject_public_key_info(
        AlgorithmIdentifierRef { oid: X509_RSA_OID, parameters: Some(AnyRef::NULL) },
        &rsa_pub_key,
    )
}

fn encode_ec_x509(data: &[u8]) -> Result<Vec<u8>, Error> {
    let (_key_size, curve_id, x, y) = split_export_data(Algorithm::Ec, data)?;
    let curve = TaCurve::from_id(curve_id)
        .ok_or_else(|| km_err!(InvalidArgument, "unknown curve {:#x} in exported key", curve_id))?;
    let curve_oid = curve
        .oid()
        .ok_or_else(|| km_err!(UnsupportedKeyFormat, "no X.509 export for {:?} keys", curve))?;
    let clen = curve.coord_len();
    // SEC1 uncompressed point.
    let mut point = vec_try_with_capacity!(1 + 2 * clen)?;
    point.try_push(0x04)?;
    put_padded(&mut point, x, clen)?;
    put_padded(&mut point, y, clen)?;
    subject_public_key_info(
        AlgorithmIdentifierRef { oid: X509_NIST_OID, parameters: Some(AnyRef::from(&curve_oid)) },
        &point,
    )
}

/// Convert key data exported by the TA into `key_format`.
///
/// RAW export is available for AES keys, whose data is passed through untouched, and for
/// Curve25519 keys, whose raw public key leads the data.  X.509 export produces a
/// `SubjectPublicKeyInfo` for RSA and NIST curve EC keys.
pub fn encode_export_data(
    key_format: KeyFormat,
    algorithm: Algorithm,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    match (key_format, algorithm) {
        (KeyFormat::Raw, Algorithm::Aes) => try_to_vec(data),
        (KeyFormat::Raw, Algorithm::Ec) => match data.get(..CURVE25519_KEY_LEN) {
            Some(key) => try_to_vec(key),
            None => Err(km_err!(InvalidArgument, "exported EC key of {} bytes", data.len())),
        },
        (KeyFormat::X509, Algorithm::Rsa) => encode_rsa_x509(data),
        (KeyFormat::X509, Algorithm::Ec) => encode_ec_x509(data),
        (format, _) => {
            Err(km_err!(UnsupportedKeyFormat, "cannot export {:?} key as {:?}", algorithm, format))
        }
    }
}

/// Size in bits of the given curve.
pub fn ec_bitlen(curve: EcCurve) -> u32 {
    match curve {
        EcCurve::P224 => 224,
        EcCurve::P256 => 256,
        EcCurve::P384 => 384,
        EcCurve::P521 => 521,
        EcCurve::Curve25519 => 256,
    }
}
