// Integration tests for the key lifecycle commands against a scripted key store.

use der::{
    asn1::{AnyRef, UintRef},
    Decode, Encode,
};
use pkcs8::PrivateKeyInfo;
use spki::{AlgorithmIdentifierRef, SubjectPublicKeyInfoRef};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tkm_common::{keydata::X509_RSA_OID, params};
use tkm_hal::{EngineConfig, TeeSession};
use tkm_tests::{FakeTa, TaMemory};
use tkm_wire::keymint::{Algorithm, ErrorCode, KeyFormat, KeyParameter, KeyPurpose, Tag};
use tkm_wire::tci::{
    AddRngEntropyResponse, DataBlob, DeleteAllKeysResponse, DeleteKeyResponse,
    ExportKeyResponse, GenerateKeyResponse, GetKeyCharacteristicsResponse, GetKeyInfoResponse,
    ImportKeyResponse, KeyMintCommand, TciCommand, TciCommandCode, TciResponse,
    UpgradeKeyResponse,
};

type Response = Result<TciResponse, ErrorCode>;

const BLOB_LEN: usize = 256;

#[derive(Debug)]
struct StoredKey {
    algorithm: u32,
    key_size: u32,
    params: Vec<KeyParameter>,
    /// Public key data in the TA export layout, empty for symmetric keys.
    public: Vec<u8>,
}

/// Fake TA that keeps created keys in memory, keyed by blob.
#[derive(Debug, Default)]
struct KeyStoreTa {
    keys: BTreeMap<Vec<u8>, StoredKey>,
    next: u32,
    entropy: Vec<u8>,
}

fn le_u32(data: &[u8], offset: usize) -> Result<u32, ErrorCode> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ErrorCode::InvalidArgument)
}

/// Public half of RSA key data: alg | bits | bits | len(n) | len(e) | n | e.
fn rsa_public(key_data: &[u8]) -> Result<Vec<u8>, ErrorCode> {
    let n_len = le_u32(key_data, 12)? as usize;
    let e_len = le_u32(key_data, 16)? as usize;
    let values = key_data.get(44..44 + n_len + e_len).ok_or(ErrorCode::InvalidArgument)?;
    let mut public = key_data[..20].to_vec();
    public.extend_from_slice(values);
    Ok(public)
}

impl KeyStoreTa {
    fn store(
        &mut self,
        mem: &mut TaMemory,
        key_blob: DataBlob,
        characteristics: DataBlob,
        key: StoredKey,
    ) -> Result<(u32, u32), ErrorCode> {
        self.next += 1;
        // Blobs are large enough to hold the characteristics, as real ones do.
        let mut blob = format!("key-{}", self.next).into_bytes();
        blob.resize(BLOB_LEN, b'.');
        mem.write(key_blob, &blob)?;
        let chars_len = Self::write_characteristics(mem, characteristics, &key.params)?;
        self.keys.insert(blob.clone(), key);
        Ok((blob.len() as u32, chars_len))
    }

    /// Report all of a key's parameters as hardware-enforced.
    fn write_characteristics(
        mem: &mut TaMemory,
        blob: DataBlob,
        key_params: &[KeyParameter],
    ) -> Result<u32, ErrorCode> {
        let mut data = params::serialize(key_params, None, None).map_err(|e| e.code())?;
        data.extend(params::serialize(&[], None, None).map_err(|e| e.code())?);
        mem.write(blob, &data)?;
        Ok(data.len() as u32)
    }

    fn lookup(&self, mem: &TaMemory, blob: DataBlob) -> Result<&StoredKey, ErrorCode> {
        self.keys.get(&mem.read(blob)?).ok_or(ErrorCode::InvalidKeyBlob)
    }

    fn read_params(mem: &TaMemory, blob: DataBlob) -> Result<Vec<KeyParameter>, ErrorCode> {
        params::deserialize(&mem.read(blob)?).map_err(|e| e.code())
    }

    fn process(&mut self, mem: &mut TaMemory, cmd: &TciCommand) -> Response {
        let cmd = match cmd {
            TciCommand::V2(cmd) => cmd,
            TciCommand::V1(_) => return Err(ErrorCode::Unimplemented),
        };
        match cmd {
            KeyMintCommand::GenerateKey(req) => {
                let key_params = Self::read_params(mem, req.params)?;
                let key = StoredKey {
                    algorithm: params::find_enum(&key_params, Tag::Algorithm)
                        .ok_or(ErrorCode::UnsupportedAlgorithm)?,
                    key_size: params::find_uint(&key_params, Tag::KeySize).unwrap_or(0),
                    params: key_params,
                    public: Vec::new(),
                };
                let (key_blob_length, characteristics_length) =
                    self.store(mem, req.key_blob, req.characteristics, key)?;
                Ok(TciResponse::GenerateKey(GenerateKeyResponse {
                    key_blob_length,
                    characteristics_length,
                    cert_chain_length: 0,
                }))
            }
            KeyMintCommand::ImportKey(req) => {
                let key_data = mem.read(req.key_data)?;
                let algorithm = le_u32(&key_data, 0)?;
                let public = if algorithm == Algorithm::Rsa as u32 {
                    rsa_public(&key_data)?
                } else {
                    Vec::new()
                };
                let key = StoredKey {
                    algorithm,
                    key_size: le_u32(&key_data, 4)?,
                    params: Self::read_params(mem, req.params)?,
                    public,
                };
                let (key_blob_length, characteristics_length) =
                    self.store(mem, req.key_blob, req.characteristics, key)?;
                Ok(TciResponse::ImportKey(ImportKeyResponse {
                    key_blob_length,
                    characteristics_length,
                    cert_chain_length: 0,
                }))
            }
            KeyMintCommand::GetKeyCharacteristics(req) => {
                let key_params = self.lookup(mem, req.key_blob)?.params.clone();
                let characteristics_length =
                    Self::write_characteristics(mem, req.characteristics, &key_params)?;
                Ok(TciResponse::GetKeyCharacteristics(GetKeyCharacteristicsResponse {
                    characteristics_length,
                }))
            }
            KeyMintCommand::GetKeyInfo(req) => {
                let key = self.lookup(mem, req.key_blob)?;
                Ok(TciResponse::GetKeyInfo(GetKeyInfoResponse {
                    key_type: key.algorithm,
                    key_size: key.key_size,
                }))
            }
            KeyMintCommand::ExportKey(req) => {
                let public = self.lookup(mem, req.key_blob)?.public.clone();
                if public.is_empty() {
                    return Err(ErrorCode::UnsupportedKeyFormat);
                }
                mem.write(req.key_data, &public)?;
                Ok(TciResponse::ExportKey(ExportKeyResponse {
                    key_data_length: public.len() as u32,
                }))
            }
            KeyMintCommand::UpgradeKey(req) => {
                self.lookup(mem, req.key_to_upgrade)?;
                Ok(TciResponse::UpgradeKey(UpgradeKeyResponse { upgraded_key_length: 0 }))
            }
            KeyMintCommand::DeleteKey(req) => {
                let blob = mem.read(req.key_to_delete)?;
                self.keys.remove(&blob).ok_or(ErrorCode::InvalidKeyBlob)?;
                Ok(TciResponse::DeleteKey(DeleteKeyResponse {}))
            }
            KeyMintCommand::DeleteAllKeys(_) => {
                self.keys.clear();
                Ok(TciResponse::DeleteAllKeys(DeleteAllKeysResponse {}))
            }
            KeyMintCommand::AddRngEntropy(req) => {
                let data = mem.read(req.rng_data)?;
                self.entropy.extend_from_slice(&data);
                Ok(TciResponse::AddRngEntropy(AddRngEntropyResponse {}))
            }
            _ => Err(ErrorCode::Unimplemented),
        }
    }
}

fn session() -> (Arc<Mutex<KeyStoreTa>>, TeeSession<FakeTa>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ta = Arc::new(Mutex::new(KeyStoreTa::default()));
    let state = ta.clone();
    let script =
        move |mem: &mut TaMemory, cmd: &TciCommand| state.lock().unwrap().process(mem, cmd);
    let session = TeeSession::new(FakeTa::new(script), EngineConfig::default()).unwrap();
    (ta, session)
}

fn aes_params() -> Vec<KeyParameter> {
    vec![
        KeyParameter::enumerated(Tag::Algorithm, Algorithm::Aes as i32),
        KeyParameter::uint(Tag::KeySize, 256),
        KeyParameter::enumerated(Tag::Purpose, KeyPurpose::Encrypt as i32),
    ]
}

#[test]
fn test_key_lifecycle() {
    let (ta, session) = session();
    let key = session.generate_key(&aes_params(), None).unwrap();
    assert!(key.key_blob.starts_with(b"key-1."));
    assert_eq!(key.key_blob.len(), BLOB_LEN);
    assert_eq!(key.hw_enforced, aes_params());
    assert!(key.sw_enforced.is_empty());
    assert!(key.cert_chain.is_empty());

    let chars = session.get_key_characteristics(&key.key_blob, &[], &[]).unwrap();
    assert_eq!(chars.hw_enforced, aes_params());
    assert_eq!(session.upgrade_key(&key.key_blob, &[]).unwrap(), None);

    // Symmetric keys have nothing to export in this key store.
    let err = session.export_key(KeyFormat::Raw, &key.key_blob, &[], &[]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedKeyFormat);

    session.delete_key(&key.key_blob).unwrap();
    let err = session.get_key_characteristics(&key.key_blob, &[], &[]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidKeyBlob);
    assert!(ta.lock().unwrap().keys.is_empty());

    assert_eq!(
        session.transport().command_codes(),
        vec![
            TciCommandCode::GenerateKey,
            TciCommandCode::GetKeyCharacteristics,
            TciCommandCode::UpgradeKey,
            TciCommandCode::GetKeyInfo,
            TciCommandCode::ExportKey,
            TciCommandCode::DeleteKey,
            TciCommandCode::GetKeyCharacteristics,
        ]
    );
    assert_eq!(session.transport().mapped(), 0);
}

fn uint(v: &[u8]) -> UintRef<'_> {
    UintRef::new(v).unwrap()
}

fn rsa_pkcs8(modulus: &[u8], public_exponent: &[u8]) -> Vec<u8> {
    let rsa_key = pkcs1::RsaPrivateKey {
        modulus: uint(modulus),
        public_exponent: uint(public_exponent),
        private_exponent: uint(&[0x0d; 256]),
        prime1: uint(&[0x0e; 128]),
        prime2: uint(&[0x0f; 128]),
        exponent1: uint(&[0x10; 128]),
        exponent2: uint(&[0x11; 128]),
        coefficient: uint(&[0x12; 128]),
        other_prime_infos: None,
    }
    .to_der()
    .unwrap();
    PrivateKeyInfo {
        algorithm: AlgorithmIdentifierRef { oid: X509_RSA_OID, parameters: Some(AnyRef::NULL) },
        private_key: &rsa_key,
        public_key: None,
    }
    .to_der()
    .unwrap()
}

#[test]
fn test_import_export_rsa() {
    let (_ta, session) = session();
    let pkcs8 = rsa_pkcs8(&[0xc1; 256], &[0x01, 0x00, 0x01]);
    let import_params = vec![
        KeyParameter::enumerated(Tag::Algorithm, Algorithm::Rsa as i32),
        KeyParameter::enumerated(Tag::Purpose, KeyPurpose::Sign as i32),
    ];
    let key = session.import_key(&import_params, KeyFormat::Pkcs8, &pkcs8, None).unwrap();

    // Size and exponent are filled in from the key material.
    let mut want = import_params.clone();
    want.push(KeyParameter::uint(Tag::KeySize, 2048));
    want.push(KeyParameter::ulong(Tag::RsaPublicExponent, 65537));
    assert_eq!(key.hw_enforced, want);

    let exported = session.export_key(KeyFormat::X509, &key.key_blob, &[], &[]).unwrap();
    let spki = SubjectPublicKeyInfoRef::from_der(&exported).unwrap();
    assert_eq!(spki.algorithm.oid, X509_RSA_OID);
    let public_key = pkcs1::RsaPublicKey::from_der(spki.subject_public_key.raw_bytes()).unwrap();
    assert_eq!(public_key.modulus.as_bytes(), &[0xc1; 256][..]);
    assert_eq!(public_key.public_exponent.as_bytes(), &[0x01, 0x00, 0x01][..]);
    assert_eq!(session.transport().mapped(), 0);
}

#[test]
fn test_import_rsa_mismatch() {
    let (ta, session) = session();
    let pkcs8 = rsa_pkcs8(&[0xc1; 256], &[0x01, 0x00, 0x01]);
    let rsa = KeyParameter::enumerated(Tag::Algorithm, Algorithm::Rsa as i32);
    let tests = [
        vec![rsa.clone(), KeyParameter::uint(Tag::KeySize, 1024)],
        vec![rsa.clone(), KeyParameter::ulong(Tag::RsaPublicExponent, 3)],
    ];
    for import_params in tests {
        let err = session.import_key(&import_params, KeyFormat::Pkcs8, &pkcs8, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImportParameterMismatch, "for {:?}", import_params);
    }

    // Exponents wider than 64 bits cannot be described by a key parameter.
    let wide = rsa_pkcs8(&[0xc1; 256], &[0x01; 9]);
    let err = session.import_key(&[rsa], KeyFormat::Pkcs8, &wide, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    assert!(session.transport().command_codes().is_empty());
    assert!(ta.lock().unwrap().keys.is_empty());
}

#[test]
fn test_delete_all_keys() {
    let (ta, session) = session();
    let first = session.generate_key(&aes_params(), None).unwrap();
    let hmac = vec![
        KeyParameter::enumerated(Tag::Algorithm, Algorithm::Hmac as i32),
        KeyParameter::uint(Tag::KeySize, 256),
    ];
    let second = session.import_key(&hmac, KeyFormat::Raw, &[0x77; 32], None).unwrap();
    assert_eq!(ta.lock().unwrap().keys.len(), 2);

    session.delete_all_keys().unwrap();
    for blob in [&first.key_blob, &second.key_blob] {
        let err = session.get_key_characteristics(blob, &[], &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKeyBlob);
    }

    session.add_rng_entropy(b"seed material").unwrap();
    session.add_rng_entropy(&[]).unwrap();
    assert_eq!(ta.lock().unwrap().entropy, b"seed material");
    assert_eq!(session.transport().mapped(), 0);
    assert_eq!(session.transport().open_sessions(), 1);
}
