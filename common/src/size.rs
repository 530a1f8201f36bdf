//! Upper bounds on the sizes of buffers the TA writes into.
//!
//! None of these functions fail.  A result of 0 means that the operation is not supported for
//! the algorithm, not that no space is needed.

use tkm_wire::keymint::Algorithm;

pub const RSA_MAX_KEY_SIZE: u32 = 4096;
pub const EC_MAX_KEY_SIZE: u32 = 521;
pub const AES_MAX_KEY_SIZE: u32 = 256;
pub const HMAC_MAX_KEY_SIZE: u32 = 2048;
pub const DES_MAX_KEY_SIZE: u32 = 192;

/// Budget for the characteristics the TA adds to a key blob on its own account.
pub const OWN_PARAMS_MAX_SIZE: usize = 256;

/// Nonce plus authentication tag (or header, nonce and shorter tag) around the encrypted blob
/// contents.
pub const KEY_BLOB_ENVELOPE_OVERHEAD: usize = 32;

/// Growth of a key blob when upgraded: up to four extra `u32`-valued parameters.
pub const UPGRADE_OVERHEAD: usize = 4 * (4 + 4);

/// Key type and key size words that start every key data structure.
const KEY_DATA_PRELIM_SIZE: usize = 4 + 4;
pub const RSA_METADATA_SIZE: usize = 9 * 4;
pub const EC_METADATA_SIZE: usize = 4 * 4;
pub const EC25519_METADATA_SIZE: usize = 4;

/// Space reserved for a serialized certificate chain returned by key creation commands.
pub const CERT_CHAIN_MAX_SIZE: usize = 8192;

/// Largest supported key size in bits for `algorithm`.
pub fn max_key_size(algorithm: Algorithm) -> u32 {
    match algorithm {
        Algorithm::Rsa => RSA_MAX_KEY_SIZE,
        Algorithm::Ec => EC_MAX_KEY_SIZE,
        Algorithm::Aes => AES_MAX_KEY_SIZE,
        Algorithm::Hmac => HMAC_MAX_KEY_SIZE,
        Algorithm::TripleDes => DES_MAX_KEY_SIZE,
    }
}

fn bits_to_bytes(bits: u32) -> usize {
    (bits as usize + 7) / 8
}

/// Key length in bytes, treating 0 bits as the worst case for the algorithm.
fn key_len(algorithm: Algorithm, key_size_bits: u32) -> usize {
    let bits = if key_size_bits > 0 { key_size_bits } else { max_key_size(algorithm) };
    bits_to_bytes(bits)
}

/// Upper bound on the plaintext key data the TA holds for a key.  A `key_size_bits` of 0 means
/// the size is not known and the worst case is assumed.
pub fn max_key_material_size(algorithm: Algorithm, key_size_bits: u32) -> usize {
    let keylen = key_len(algorithm, key_size_bits);
    match algorithm {
        // n, e, d, p, q, dp, dq, qinv
        Algorithm::Rsa => KEY_DATA_PRELIM_SIZE + RSA_METADATA_SIZE + 8 * keylen,
        // k, x, y
        Algorithm::Ec => KEY_DATA_PRELIM_SIZE + EC_METADATA_SIZE + 3 * keylen,
        Algorithm::Aes | Algorithm::Hmac | Algorithm::TripleDes => KEY_DATA_PRELIM_SIZE + keylen,
    }
}

/// Upper bound on the size of a key blob holding a key of the given type and size, created
/// with `params_size_bytes` of serialized caller parameters.
pub fn key_blob_max_size(
    algorithm: Algorithm,
    key_size_bits: u32,
    params_size_bytes: usize,
) -> usize {
    4 + params_size_bytes
        + OWN_PARAMS_MAX_SIZE
        + max_key_material_size(algorithm, key_size_bits)
        + KEY_BLOB_ENVELOPE_OVERHEAD
}

/// Upper bound on the length of exported key data.  Export of HMAC and 3DES keys is not
/// supported.
pub fn export_data_max_size(algorithm: Algorithm, key_size_bits: u32) -> usize {
    let keylen = key_len(algorithm, key_size_bits);
    match algorithm {
        // Hardware-wrapped form: key and GCM tag, then the wrapping secret and its tag.
        Algorithm::Aes => keylen + 32 + 32 + 16,
        Algorithm::Hmac | Algorithm::TripleDes => 0,
        // type | size | size-or-curve | len | len | two big integers
        Algorithm::Rsa | Algorithm::Ec => 5 * 4 + 2 * keylen,
    }
}

/// Upper bound on the size of a key blob after upgrade.
pub fn upgraded_key_blob_max_size(key_blob_len: usize) -> usize {
    key_blob_len + UPGRADE_OVERHEAD
}

/// Indicate whether the TA can hold a key of `bits` bits for `algorithm`.  Triple DES keys are
/// described by their effective size of 168 bits.
pub fn key_size_supported(algorithm: Algorithm, bits: u32) -> bool {
    match algorithm {
        Algorithm::Rsa => (256..=RSA_MAX_KEY_SIZE).contains(&bits) && bits % 64 == 0,
        Algorithm::Ec => matches!(bits, 192 | 224 | 256 | 384 | 521),
        Algorithm::Aes => matches!(bits, 128 | 192 | 256),
        Algorithm::Hmac => (64..=HMAC_MAX_KEY_SIZE).contains(&bits) && bits % 8 == 0,
        Algorithm::TripleDes => bits == 168,
    }
}

/// Extra output space, beyond the input length, that a streaming operation may need for
/// buffered block cipher data.
pub fn block_output_overhead(algorithm: Algorithm) -> Option<usize> {
    match algorithm {
        Algorithm::Aes => Some(16),
        Algorithm::TripleDes => Some(8),
        _ => None,
    }
}
