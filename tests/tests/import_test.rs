// Integration tests for wrapped key import against a scripted TA.

use std::sync::{Arc, Mutex};
use tkm_common::{
    params,
    wrapper::{
        encode_key_description, parse_authorization_list, RepeatedTagPolicy, SecureKeyWrapper,
    },
};
use tkm_hal::{EngineConfig, TeeSession};
use tkm_tests::{FakeTa, TaMemory};
use tkm_wire::keymint::{Algorithm, ErrorCode, KeyFormat, KeyParameter, Tag};
use tkm_wire::tci::{
    ImportWrappedKeyRequest, ImportWrappedKeyResponse, KeyMintCommand, Keymaster4Command,
    ProtocolVersion, TciCommand, TciResponse,
};

/// AuthorizationList of { algorithm AES, keySize 256, userSecureId 3 }.
const AUTH_LIST: &str = "3012a203020120a30402020100bf837603020103";
/// AuthorizationList of { algorithm AES, keySize 256 }.
const AUTH_LIST_NO_SID: &str = "300ba203020120a30402020100";
/// AuthorizationList of { keySize 256 }.
const AUTH_LIST_NO_ALGORITHM: &str = "3006a30402020100";

const MASKING_KEY: [u8; 32] = [0x5a; 32];
const IMPORTED_BLOB: &[u8] = b"imported key blob";
const CERT: &[u8] = b"not really a certificate";

fn wrapped_key(auth_list_hex: &str) -> Vec<u8> {
    let auth_list = hex::decode(auth_list_hex).unwrap();
    let key_description = encode_key_description(KeyFormat::Raw as u32, &auth_list).unwrap();
    SecureKeyWrapper {
        encrypted_transport_key: &[0x11; 256],
        initialization_vector: &[0x22u8; 12],
        key_description: &key_description,
        key_format: KeyFormat::Raw as u32,
        authorization_list: &auth_list,
        encrypted_key: &[0x33; 32],
        tag: &[0x44; 16],
    }
    .to_der()
    .unwrap()
}

fn characteristics() -> (Vec<KeyParameter>, Vec<KeyParameter>) {
    (
        vec![
            KeyParameter::enumerated(Tag::Algorithm, Algorithm::Aes as i32),
            KeyParameter::uint(Tag::KeySize, 256),
        ],
        vec![KeyParameter::date(Tag::CreationDatetime, 1_700_000_000_000)],
    )
}

/// What the TA saw of an import request.
struct Seen {
    req: ImportWrappedKeyRequest,
    params: Vec<u8>,
    wrap: Vec<u8>,
}

fn respond(
    mem: &mut TaMemory,
    req: &ImportWrappedKeyRequest,
) -> Result<ImportWrappedKeyResponse, ErrorCode> {
    mem.write(req.key_blob, IMPORTED_BLOB)?;
    let (hw, sw) = characteristics();
    let mut chars = params::serialize(&hw, None, None).unwrap();
    chars.extend(params::serialize(&sw, None, None).unwrap());
    mem.write(req.key_characteristics, &chars)?;
    let mut chain = 1u32.to_le_bytes().to_vec();
    chain.extend((CERT.len() as u32).to_le_bytes());
    chain.extend(CERT);
    mem.write(req.cert_chain, &chain)?;
    Ok(ImportWrappedKeyResponse {
        key_blob_length: IMPORTED_BLOB.len() as u32,
        key_characteristics_length: chars.len() as u32,
        cert_chain_length: chain.len() as u32,
    })
}

type Response = Result<TciResponse, ErrorCode>;

fn importing_ta(
    overstate: u32,
) -> (Arc<Mutex<Vec<Seen>>>, impl Fn(&mut TaMemory, &TciCommand) -> Response) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let script = move |mem: &mut TaMemory, cmd: &TciCommand| -> Response {
        let req = match cmd {
            TciCommand::V1(Keymaster4Command::ImportWrappedKey(req))
            | TciCommand::V2(KeyMintCommand::ImportWrappedKey(req)) => req,
            _ => return Err(ErrorCode::Unimplemented),
        };
        log.lock().unwrap().push(Seen {
            req: req.clone(),
            params: mem.read(req.params)?,
            wrap: mem.read(req.wrap)?,
        });
        let mut rsp = respond(mem, req)?;
        rsp.cert_chain_length += overstate;
        Ok(TciResponse::ImportWrappedKey(rsp))
    };
    (seen, script)
}

fn session(overstate: u32, config: EngineConfig) -> (Arc<Mutex<Vec<Seen>>>, TeeSession<FakeTa>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (seen, script) = importing_ta(overstate);
    let session = TeeSession::new(FakeTa::new(script), config).unwrap();
    (seen, session)
}

#[test]
fn test_import_wrapped_key() {
    let (seen, session) = session(0, EngineConfig::default());
    let unwrapping_params = vec![KeyParameter::enumerated(Tag::Algorithm, Algorithm::Rsa as i32)];
    let wrapped = wrapped_key(AUTH_LIST);
    let imported = session
        .import_wrapped_key(
            &wrapped,
            b"wrapping key blob",
            &MASKING_KEY,
            &unwrapping_params,
            7,
            9,
        )
        .unwrap();

    let (hw, sw) = characteristics();
    assert_eq!(imported.key_blob, IMPORTED_BLOB);
    assert_eq!(imported.hw_enforced, hw);
    assert_eq!(imported.sw_enforced, sw);
    assert_eq!(imported.cert_chain, vec![CERT.to_vec()]);
    assert_eq!(session.transport().mapped(), 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let Seen { req, params: params_buf, wrap } = &seen[0];
    assert_eq!(req.key_format, KeyFormat::Raw as u32);
    assert_eq!(req.key_type, Algorithm::Aes as u32);
    assert_eq!(req.masking_key, MASKING_KEY);
    assert_eq!(req.iv_len, 12);
    assert_eq!(&req.initialization_vector[..12], &[0x22u8; 12]);
    assert_eq!(&req.initialization_vector[12..], &[0u8; 4]);
    assert_eq!(req.tag, [0x44u8; 16]);
    // userSecureId 3 has both the password and the fingerprint bits set.
    assert_eq!(req.password_sid, 7);
    assert_eq!(req.biometric_sid, 9);

    let auth_list = hex::decode(AUTH_LIST).unwrap();
    let auths = parse_authorization_list(&auth_list, RepeatedTagPolicy::LastWins).unwrap();
    let key_description = encode_key_description(KeyFormat::Raw as u32, &auth_list).unwrap();
    let (etk, kd, ek) =
        (req.etk_offset as usize, req.kd_offset as usize, req.ek_offset as usize);
    assert_eq!(&params_buf[..etk], &auths.key_params[..]);
    assert_eq!(&params_buf[etk..kd], &[0x11u8; 256]);
    assert_eq!(&params_buf[kd..ek], &key_description[..]);
    assert_eq!(&params_buf[ek..], &[0x33u8; 32]);

    let unwrap_params = params::serialize(&unwrapping_params, None, None).unwrap();
    let wkb = req.wkb_offset as usize;
    assert_eq!(&wrap[..wkb], &unwrap_params[..]);
    assert_eq!(&wrap[wkb..], b"wrapping key blob");

    // The certificate chain buffer directly follows the characteristics buffer.
    assert_eq!(
        req.cert_chain.data,
        req.key_characteristics.data + req.key_characteristics.data_length
    );
    assert_eq!(req.cert_chain.data_length, 8192);
}

#[test]
fn test_import_without_secure_user_id() {
    let (seen, session) = session(0, EngineConfig::default());
    session
        .import_wrapped_key(&wrapped_key(AUTH_LIST_NO_SID), b"wkb", &MASKING_KEY, &[], 7, 9)
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].req.password_sid, 0);
    assert_eq!(seen[0].req.biometric_sid, 0);
}

#[test]
fn test_import_keymaster4() {
    let config = EngineConfig { protocol: ProtocolVersion::Keymaster4, ..Default::default() };
    let (seen, session) = session(0, config);
    let imported = session
        .import_wrapped_key(&wrapped_key(AUTH_LIST), b"wkb", &MASKING_KEY, &[], 1, 2)
        .unwrap();
    assert_eq!(imported.key_blob, IMPORTED_BLOB);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(session.transport().command_ids(), vec![0x0004_000e]);
}

#[test]
fn test_import_rejected_before_ta() {
    let (seen, session) = session(0, EngineConfig::default());
    let wrapped = wrapped_key(AUTH_LIST);
    let masking_key = MASKING_KEY;
    let tests = [
        (wrapped_key(AUTH_LIST_NO_ALGORITHM), &masking_key[..]),
        (wrapped.clone(), &masking_key[..31]),
        (wrapped[..wrapped.len() - 1].to_vec(), &masking_key[..]),
    ];
    for (data, masking_key) in tests.iter() {
        let err = session
            .import_wrapped_key(data, b"wkb", masking_key, &[], 0, 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument, "for {}", hex::encode(data));
    }
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(session.transport().mapped(), 0);
}

#[test]
fn test_import_ta_overstates_lengths() {
    let (_seen, session) = session(10_000, EngineConfig::default());
    let err = session
        .import_wrapped_key(&wrapped_key(AUTH_LIST), b"wkb", &MASKING_KEY, &[], 0, 0)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SecureHwCommunicationFailed);
    assert_eq!(session.transport().mapped(), 0);
}

#[test]
fn test_import_ta_error() {
    let ta = FakeTa::new(|_mem: &mut TaMemory, _cmd: &TciCommand| -> Response {
        Err(ErrorCode::VerificationFailed)
    });
    let session = TeeSession::new(ta, EngineConfig::default()).unwrap();
    let err = session
        .import_wrapped_key(&wrapped_key(AUTH_LIST), b"wkb", &MASKING_KEY, &[], 0, 0)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::VerificationFailed);
    assert_eq!(session.transport().mapped(), 0);
}
