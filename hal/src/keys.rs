//! Key lifecycle entry points: creation, inspection, export, upgrade and deletion.

use crate::session::{len_u32, unexpected, KeyCreationResult, TeeSession};
use crate::{Mapping, SecureTransport};
use log::{debug, info};
use tkm_common::{
    keydata::{decode_key_data, ec_bitlen, encode_export_data},
    km_err, params,
    size::{
        export_data_max_size, key_blob_max_size, key_size_supported, upgraded_key_blob_max_size,
        CERT_CHAIN_MAX_SIZE, OWN_PARAMS_MAX_SIZE,
    },
    vec_try, vec_try_with_capacity, Error, FallibleAllocExt,
};
use tkm_wire::{
    keymint::{Algorithm, EcCurve, KeyFormat, KeyParamValue, KeyParameter, KeyPurpose, Tag},
    tci::{
        AddRngEntropyRequest, DataBlob, DeleteAllKeysRequest, DeleteKeyRequest, ExportKeyRequest,
        GenerateKeyRequest, GetKeyCharacteristicsRequest, GetKeyInfoRequest, ImportKeyRequest,
        KeyMintCommand, Keymaster4Command, TciResponse, UpgradeKeyRequest,
    },
};
use zeroize::Zeroizing;

/// Largest amount of entropy accepted in one call to [`TeeSession::add_rng_entropy`].
pub const MAX_RNG_ENTROPY_LEN: usize = 16 * 1024;

/// Public exponent used for generated RSA keys when the caller does not pick one.
pub const DEFAULT_RSA_EXPONENT: u64 = 65537;

/// Offset of the key size word in the TA key data layout.
const KEY_DATA_SIZE_OFFSET: usize = 4;
/// Offsets of len(n) and len(e) in RSA key data, and of the first big integer.
const RSA_N_LEN_OFFSET: usize = 12;
const RSA_E_LEN_OFFSET: usize = 16;
const RSA_INTEGERS_OFFSET: usize = 44;

/// Caller-supplied key that signs the attestation of a new key, in place of the factory key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationKey {
    pub key_blob: Vec<u8>,
    pub params: Vec<KeyParameter>,
    /// DER-encoded subject of the attestation key's certificate.
    pub issuer_subject_name: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCharacteristics {
    pub hw_enforced: Vec<KeyParameter>,
    pub sw_enforced: Vec<KeyParameter>,
}

/// Reference to `len` bytes at `offset` into a mapped buffer.  Nothing is referenced when `len`
/// is zero.
fn blob_at(base: DataBlob, offset: usize, len: usize) -> Result<DataBlob, Error> {
    if len == 0 {
        return Ok(DataBlob::default());
    }
    let data = base
        .data
        .checked_add(len_u32(offset, "buffer offset")?)
        .ok_or_else(|| km_err!(InvalidInputLength, "buffer address overflow"))?;
    Ok(DataBlob { data, data_length: len_u32(len, "buffer")? })
}

fn concat(parts: &[&[u8]]) -> Result<Vec<u8>, Error> {
    let mut out = vec_try_with_capacity!(parts.iter().map(|p| p.len()).sum::<usize>())?;
    for part in parts {
        out.try_extend_from_slice(part)?;
    }
    Ok(out)
}

fn le_u32_at(data: &[u8], offset: usize) -> Result<u32, Error> {
    data.get(offset..offset + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| km_err!(InvalidArgument, "key data of {} bytes too short", data.len()))
}

fn key_algorithm(params: &[KeyParameter]) -> Result<Algorithm, Error> {
    let raw = params::find_enum(params, Tag::Algorithm)
        .ok_or_else(|| km_err!(UnsupportedAlgorithm, "no algorithm specified"))?;
    Algorithm::n(raw as i32)
        .ok_or_else(|| km_err!(UnsupportedAlgorithm, "unknown algorithm {}", raw))
}

fn ec_curve(params: &[KeyParameter]) -> Result<Option<EcCurve>, Error> {
    params::find_enum(params, Tag::EcCurve)
        .map(|raw| {
            EcCurve::n(raw as i32)
                .ok_or_else(|| km_err!(UnsupportedEcCurve, "unknown curve {}", raw))
        })
        .transpose()
}

fn check_key_size(algorithm: Algorithm, bits: u32) -> Result<(), Error> {
    if key_size_supported(algorithm, bits) {
        Ok(())
    } else {
        Err(km_err!(UnsupportedKeySize, "{}-bit {:?} key", bits, algorithm))
    }
}

/// Key size to budget the key blob for.  Triple DES keys hold 192 bits of material for their
/// 168 effective bits.
fn blob_key_bits(algorithm: Algorithm, bits: u32) -> u32 {
    match algorithm {
        Algorithm::TripleDes => 192,
        _ => bits,
    }
}

fn generation_exponent(params: &[KeyParameter]) -> Result<u64, Error> {
    match params::find_ulong(params, Tag::RsaPublicExponent) {
        Some(e) if e == 1 || e % 2 == 0 => {
            Err(km_err!(InvalidArgument, "RSA public exponent {} not allowed", e))
        }
        Some(e) => Ok(e),
        None => Ok(DEFAULT_RSA_EXPONENT),
    }
}

/// Public exponent held in RSA key data, a big-endian integer of at most 8 bytes.
fn key_data_exponent(data: &[u8]) -> Result<u64, Error> {
    let n_len = le_u32_at(data, RSA_N_LEN_OFFSET)? as usize;
    let e_len = le_u32_at(data, RSA_E_LEN_OFFSET)? as usize;
    if e_len > 8 {
        return Err(km_err!(InvalidArgument, "RSA public exponent of {} bytes", e_len));
    }
    let e = RSA_INTEGERS_OFFSET
        .checked_add(n_len)
        .and_then(|start| data.get(start..start.checked_add(e_len)?))
        .ok_or_else(|| km_err!(InvalidArgument, "RSA key data truncated"))?;
    Ok(e.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn is_x25519(params: &[KeyParameter], curve: Option<EcCurve>) -> bool {
    curve == Some(EcCurve::Curve25519)
        && params.iter().any(|p| {
            p.tag == Tag::Purpose && p.value == KeyParamValue::Enum(KeyPurpose::AgreeKey as u32)
        })
}

fn check_key_blob(key_blob: &[u8]) -> Result<(), Error> {
    if key_blob.is_empty() {
        return Err(km_err!(InvalidKeyBlob, "empty key blob"));
    }
    Ok(())
}

/// Serialized key parameters followed by the attestation key's parameters.  Also returns the
/// length of each part.
fn creation_params(
    key_params: Vec<u8>,
    attestation_key: Option<&AttestationKey>,
) -> Result<(Vec<u8>, usize, usize), Error> {
    let params_len = key_params.len();
    match attestation_key {
        None => Ok((key_params, params_len, 0)),
        Some(key) => {
            let attest_params = params::serialize(&key.params, None, None)?;
            let data = concat(&[&key_params, &attest_params])?;
            Ok((data, params_len, attest_params.len()))
        }
    }
}

/// References to the attestation key blob and issuer, stored back to back at `offset` into a
/// mapped buffer.
fn attestation_blobs(
    base: DataBlob,
    offset: usize,
    attestation_key: Option<&AttestationKey>,
) -> Result<(DataBlob, DataBlob), Error> {
    match attestation_key {
        None => Ok((DataBlob::default(), DataBlob::default())),
        Some(key) => Ok((
            blob_at(base, offset, key.key_blob.len())?,
            blob_at(base, offset + key.key_blob.len(), key.issuer_subject_name.len())?,
        )),
    }
}

/// Characteristics and certificate chain share one buffer, the chain starting at `chars_size`.
fn chars_and_certs_buffer(chars_size: usize) -> Result<Vec<u8>, Error> {
    vec_try![0u8; chars_size + CERT_CHAIN_MAX_SIZE]
}

/// Lengths the TA reports for a newly created key.
#[derive(Debug)]
struct CreatedLengths {
    key_blob: u32,
    characteristics: u32,
    cert_chain: u32,
}

/// Collect the outputs of GENERATE_KEY or IMPORT_KEY.
fn read_creation<T: SecureTransport + ?Sized>(
    key_map: &Mapping<'_, T>,
    key_space: usize,
    certs_map: &Mapping<'_, T>,
    chars_size: usize,
    lengths: CreatedLengths,
) -> Result<KeyCreationResult, Error> {
    let blob_len = lengths.key_blob as usize;
    let chars_len = lengths.characteristics as usize;
    let certs_len = lengths.cert_chain as usize;
    if blob_len == 0
        || blob_len > key_space
        || chars_len > chars_size
        || certs_len > CERT_CHAIN_MAX_SIZE
    {
        return Err(km_err!(
            SecureHwCommunicationFailed,
            "TA reported lengths {:?} beyond the buffers supplied",
            lengths
        ));
    }
    let mut key_blob = vec_try![0u8; blob_len]?;
    key_map.read_into(&mut key_blob)?;
    let mut certs_and_chars = vec_try![0u8; chars_size + certs_len]?;
    certs_map.read_into(&mut certs_and_chars)?;

    let (hw_enforced, sw_enforced) =
        params::deserialize_characteristics(&certs_and_chars[..chars_len])?;
    let cert_chain = if certs_len == 0 {
        Vec::new()
    } else {
        params::deserialize_cert_chain(&certs_and_chars[chars_size..])?
    };
    Ok(KeyCreationResult { key_blob, hw_enforced, sw_enforced, cert_chain })
}

impl<T: SecureTransport> TeeSession<T> {
    /// Have the TA generate a new key described by `params`.
    ///
    /// The key size comes from `Tag::KeySize`, or from the curve for EC keys.  RSA keys get a
    /// public exponent of 65537 unless one is given.
    pub fn generate_key(
        &self,
        params: &[KeyParameter],
        attestation_key: Option<&AttestationKey>,
    ) -> Result<KeyCreationResult, Error> {
        let algorithm = key_algorithm(params)?;
        let key_size = match (params::find_uint(params, Tag::KeySize), ec_curve(params)?) {
            (Some(bits), _) => bits,
            (None, Some(curve)) if algorithm == Algorithm::Ec => ec_bitlen(curve),
            _ => return Err(km_err!(UnsupportedKeySize, "no key size for {:?} key", algorithm)),
        };
        check_key_size(algorithm, key_size)?;
        let exponent = match algorithm {
            Algorithm::Rsa => Some(generation_exponent(params)?),
            _ => None,
        };
        let key_params = params::serialize(params, None, exponent)?;
        let (params_data, params_len, attest_params_len) =
            creation_params(key_params, attestation_key)?;
        let attest_data = match attestation_key {
            Some(key) => concat(&[&key.key_blob, &key.issuer_subject_name])?,
            None => Vec::new(),
        };

        let key_space =
            key_blob_max_size(algorithm, blob_key_bits(algorithm, key_size), params_len);
        let chars_size = params_len + OWN_PARAMS_MAX_SIZE;
        let key_blob = vec_try![0u8; key_space]?;
        let certs_and_chars = chars_and_certs_buffer(chars_size)?;

        let params_map = self.map(&params_data)?;
        let attest_map = self.map(&attest_data)?;
        let key_map = self.map(&key_blob)?;
        let certs_map = self.map(&certs_and_chars)?;
        let (attest_key_blob, attest_issuer_blob) =
            attestation_blobs(attest_map.blob(), 0, attestation_key)?;
        let req = GenerateKeyRequest {
            params: blob_at(params_map.blob(), 0, params_len)?,
            attest_key_params: blob_at(params_map.blob(), params_len, attest_params_len)?,
            attest_key_blob,
            attest_issuer_blob,
            key_blob: key_map.blob(),
            characteristics: blob_at(certs_map.blob(), 0, chars_size)?,
            cert_chain: blob_at(certs_map.blob(), chars_size, CERT_CHAIN_MAX_SIZE)?,
        };
        debug!("generating {}-bit {:?} key: {:?}", key_size, algorithm, req);
        let cmd = self.command(
            Keymaster4Command::GenerateKey(req.clone()),
            KeyMintCommand::GenerateKey(req),
        );
        let rsp = match self.execute(&cmd)? {
            TciResponse::GenerateKey(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let result = read_creation(
            &key_map,
            key_space,
            &certs_map,
            chars_size,
            CreatedLengths {
                key_blob: rsp.key_blob_length,
                characteristics: rsp.characteristics_length,
                cert_chain: rsp.cert_chain_length,
            },
        )?;
        info!(
            "generated {}-bit {:?} key: {}-byte blob, {} certificates",
            key_size,
            algorithm,
            result.key_blob.len(),
            result.cert_chain.len()
        );
        Ok(result)
    }

    /// Import plaintext key material in `key_format`.
    ///
    /// The key size and, for RSA, the public exponent are taken from the key material; if
    /// `params` also gives them they must agree.
    pub fn import_key(
        &self,
        params: &[KeyParameter],
        key_format: KeyFormat,
        key_data: &[u8],
        attestation_key: Option<&AttestationKey>,
    ) -> Result<KeyCreationResult, Error> {
        let algorithm = key_algorithm(params)?;
        let curve = ec_curve(params)?;
        let decoded =
            decode_key_data(key_format, algorithm, curve, is_x25519(params, curve), key_data)?;
        let decoded_size = le_u32_at(decoded.as_slice(), KEY_DATA_SIZE_OFFSET)?;
        let key_size = match algorithm {
            Algorithm::TripleDes if decoded_size == 192 => 168,
            Algorithm::TripleDes => {
                return Err(km_err!(UnsupportedKeySize, "{}-bit 3DES key material", decoded_size))
            }
            _ => decoded_size,
        };
        if let Some(bits) = params::find_uint(params, Tag::KeySize) {
            if bits != key_size {
                return Err(km_err!(
                    ImportParameterMismatch,
                    "key size {} given for {}-bit key material",
                    bits,
                    key_size
                ));
            }
        }
        check_key_size(algorithm, key_size)?;
        let exponent = match algorithm {
            Algorithm::Rsa => {
                let e = key_data_exponent(decoded.as_slice())?;
                match params::find_ulong(params, Tag::RsaPublicExponent) {
                    Some(given) if given != e => {
                        return Err(km_err!(
                            ImportParameterMismatch,
                            "public exponent {} given for key with exponent {}",
                            given,
                            e
                        ))
                    }
                    _ => Some(e),
                }
            }
            _ => None,
        };
        let key_params = params::serialize(params, Some(key_size), exponent)?;
        let (params_data, params_len, attest_params_len) =
            creation_params(key_params, attestation_key)?;

        // key blob = space for the new blob | attestation key blob | issuer
        let key_space =
            key_blob_max_size(algorithm, blob_key_bits(algorithm, key_size), params_len);
        let mut key_blob = vec_try![0u8; key_space]?;
        if let Some(key) = attestation_key {
            key_blob.try_extend_from_slice(&key.key_blob)?;
            key_blob.try_extend_from_slice(&key.issuer_subject_name)?;
        }
        let chars_size = params_len + OWN_PARAMS_MAX_SIZE;
        let certs_and_chars = chars_and_certs_buffer(chars_size)?;

        let params_map = self.map(&params_data)?;
        let data_map = self.map(decoded.as_slice())?;
        let key_map = self.map(&key_blob)?;
        let certs_map = self.map(&certs_and_chars)?;
        let (attest_key_blob, attest_issuer_blob) =
            attestation_blobs(key_map.blob(), key_space, attestation_key)?;
        let req = ImportKeyRequest {
            params: blob_at(params_map.blob(), 0, params_len)?,
            attest_key_params: blob_at(params_map.blob(), params_len, attest_params_len)?,
            attest_key_blob,
            attest_issuer_blob,
            key_data: data_map.blob(),
            key_blob: blob_at(key_map.blob(), 0, key_space)?,
            characteristics: blob_at(certs_map.blob(), 0, chars_size)?,
            cert_chain: blob_at(certs_map.blob(), chars_size, CERT_CHAIN_MAX_SIZE)?,
        };
        debug!("importing {}-bit {:?} key from {:?}: {:?}", key_size, algorithm, key_format, req);
        let cmd =
            self.command(Keymaster4Command::ImportKey(req.clone()), KeyMintCommand::ImportKey(req));
        let rsp = match self.execute(&cmd)? {
            TciResponse::ImportKey(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let result = read_creation(
            &key_map,
            key_space,
            &certs_map,
            chars_size,
            CreatedLengths {
                key_blob: rsp.key_blob_length,
                characteristics: rsp.characteristics_length,
                cert_chain: rsp.cert_chain_length,
            },
        )?;
        info!(
            "imported {}-bit {:?} key: {}-byte blob, {} certificates",
            key_size,
            algorithm,
            result.key_blob.len(),
            result.cert_chain.len()
        );
        Ok(result)
    }

    pub fn get_key_characteristics(
        &self,
        key_blob: &[u8],
        client_id: &[u8],
        app_data: &[u8],
    ) -> Result<KeyCharacteristics, Error> {
        check_key_blob(key_blob)?;
        // The characteristics are stored inside the blob, so cannot be any larger.
        let mut characteristics = vec_try![0u8; key_blob.len()]?;
        let blob_map = self.map(key_blob)?;
        let id_map = self.map(client_id)?;
        let app_map = self.map(app_data)?;
        let chars_map = self.map(&characteristics)?;
        let req = GetKeyCharacteristicsRequest {
            key_blob: blob_map.blob(),
            client_id: id_map.blob(),
            app_data: app_map.blob(),
            characteristics: chars_map.blob(),
        };
        let cmd = self.command(
            Keymaster4Command::GetKeyCharacteristics(req.clone()),
            KeyMintCommand::GetKeyCharacteristics(req),
        );
        let rsp = match self.execute(&cmd)? {
            TciResponse::GetKeyCharacteristics(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let len = rsp.characteristics_length as usize;
        if len > characteristics.len() {
            return Err(km_err!(
                SecureHwCommunicationFailed,
                "TA reported {} bytes of characteristics for a {}-byte buffer",
                len,
                characteristics.len()
            ));
        }
        chars_map.read_into(&mut characteristics[..len])?;
        let (hw_enforced, sw_enforced) =
            params::deserialize_characteristics(&characteristics[..len])?;
        Ok(KeyCharacteristics { hw_enforced, sw_enforced })
    }

    /// Type and size in bits of the key held in `key_blob`.
    fn key_info(
        &self,
        key_blob: &[u8],
        client_id: &[u8],
        app_data: &[u8],
    ) -> Result<(Algorithm, u32), Error> {
        let blob_map = self.map(key_blob)?;
        let id_map = self.map(client_id)?;
        let app_map = self.map(app_data)?;
        let req = GetKeyInfoRequest {
            key_blob: blob_map.blob(),
            client_id: id_map.blob(),
            app_data: app_map.blob(),
        };
        let cmd = self.command(
            Keymaster4Command::GetKeyInfo(req.clone()),
            KeyMintCommand::GetKeyInfo(req),
        );
        let rsp = match self.execute(&cmd)? {
            TciResponse::GetKeyInfo(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let algorithm = Algorithm::n(rsp.key_type as i32).ok_or_else(|| {
            km_err!(SecureHwCommunicationFailed, "TA returned unknown key type {}", rsp.key_type)
        })?;
        Ok((algorithm, rsp.key_size))
    }

    /// Export the key in `key_blob` as `key_format`: the public key for asymmetric keys, or the
    /// hardware-wrapped form of an AES key.
    pub fn export_key(
        &self,
        key_format: KeyFormat,
        key_blob: &[u8],
        client_id: &[u8],
        app_data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        check_key_blob(key_blob)?;
        let (algorithm, key_size) = self.key_info(key_blob, client_id, app_data)?;
        let size = export_data_max_size(algorithm, key_size);
        if size == 0 {
            return Err(km_err!(UnsupportedKeyFormat, "{:?} keys cannot be exported", algorithm));
        }
        let mut key_data = Zeroizing::new(vec_try![0u8; size]?);
        let blob_map = self.map(key_blob)?;
        let id_map = self.map(client_id)?;
        let app_map = self.map(app_data)?;
        let data_map = self.map(&key_data)?;
        let req = ExportKeyRequest {
            key_blob: blob_map.blob(),
            client_id: id_map.blob(),
            app_data: app_map.blob(),
            key_data: data_map.blob(),
        };
        let cmd =
            self.command(Keymaster4Command::ExportKey(req.clone()), KeyMintCommand::ExportKey(req));
        let rsp = match self.execute(&cmd)? {
            TciResponse::ExportKey(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let len = rsp.key_data_length as usize;
        if len > size {
            return Err(km_err!(
                SecureHwCommunicationFailed,
                "TA exported {} bytes into a {}-byte buffer",
                len,
                size
            ));
        }
        data_map.read_into(&mut key_data[..len])?;
        debug!("exported {}-bit {:?} key as {:?}", key_size, algorithm, key_format);
        encode_export_data(key_format, algorithm, &key_data[..len])
    }

    /// Bring `key_blob` up to date with the TA's current version and patch level.  Returns
    /// `None` when the blob is already current.
    pub fn upgrade_key(
        &self,
        key_blob: &[u8],
        upgrade_params: &[KeyParameter],
    ) -> Result<Option<Vec<u8>>, Error> {
        check_key_blob(key_blob)?;
        let params_data = params::serialize(upgrade_params, None, None)?;
        let mut upgraded = vec_try![0u8; upgraded_key_blob_max_size(key_blob.len())]?;
        let blob_map = self.map(key_blob)?;
        let params_map = self.map(&params_data)?;
        let upgraded_map = self.map(&upgraded)?;
        let req = UpgradeKeyRequest {
            key_to_upgrade: blob_map.blob(),
            upgrade_params: params_map.blob(),
            upgraded_key: upgraded_map.blob(),
        };
        let cmd = self.command(
            Keymaster4Command::UpgradeKey(req.clone()),
            KeyMintCommand::UpgradeKey(req),
        );
        let rsp = match self.execute(&cmd)? {
            TciResponse::UpgradeKey(rsp) => rsp,
            other => return Err(unexpected(&other)),
        };
        let len = rsp.upgraded_key_length as usize;
        if len == 0 {
            debug!("{}-byte key blob needs no upgrade", key_blob.len());
            return Ok(None);
        }
        if len > upgraded.len() {
            return Err(km_err!(
                SecureHwCommunicationFailed,
                "TA upgraded key to {} bytes in a {}-byte buffer",
                len,
                upgraded.len()
            ));
        }
        upgraded_map.read_into(&mut upgraded[..len])?;
        upgraded.truncate(len);
        info!("upgraded {}-byte key blob to {} bytes", key_blob.len(), len);
        Ok(Some(upgraded))
    }

    pub fn delete_key(&self, key_blob: &[u8]) -> Result<(), Error> {
        check_key_blob(key_blob)?;
        let blob_map = self.map(key_blob)?;
        let req = DeleteKeyRequest { key_to_delete: blob_map.blob() };
        let cmd =
            self.command(Keymaster4Command::DeleteKey(req.clone()), KeyMintCommand::DeleteKey(req));
        match self.execute(&cmd)? {
            TciResponse::DeleteKey(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn delete_all_keys(&self) -> Result<(), Error> {
        let cmd = self.command(
            Keymaster4Command::DeleteAllKeys(DeleteAllKeysRequest {}),
            KeyMintCommand::DeleteAllKeys(DeleteAllKeysRequest {}),
        );
        match self.execute(&cmd)? {
            TciResponse::DeleteAllKeys(_) => {
                info!("deleted all keys");
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Mix `data` into the TA's random number generator.  Nothing is sent for empty input.
    pub fn add_rng_entropy(&self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > MAX_RNG_ENTROPY_LEN {
            return Err(km_err!(InvalidInputLength, "{} bytes of entropy", data.len()));
        }
        let data_map = self.map(data)?;
        let req = AddRngEntropyRequest { rng_data: data_map.blob() };
        let cmd = self.command(
            Keymaster4Command::AddRngEntropy(req.clone()),
            KeyMintCommand::AddRngEntropy(req),
        );
        match self.execute(&cmd)? {
            TciResponse::AddRngEntropy(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}
