// Integration tests driving a TeeSession against a scripted TA.

use std::sync::{Arc, Mutex};
use tkm_hal::{EngineConfig, TeeSession};
use tkm_tests::{EchoTa, FakeTa};
use tkm_wire::keymint::{Algorithm, ErrorCode, KeyParameter, KeyPurpose, Tag};
use tkm_wire::tci::{command_id, ProtocolVersion, TciCommandCode};
use tkm_wire::OpHandle;

fn setup(
    algorithm: Algorithm,
    final_length: u32,
    config: EngineConfig,
) -> (Arc<Mutex<EchoTa>>, Arc<FakeTa>, TeeSession<Arc<FakeTa>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ta = EchoTa::shared(algorithm, final_length);
    let transport = Arc::new(FakeTa::new(EchoTa::script(ta.clone())));
    let session = TeeSession::new(transport.clone(), config).unwrap();
    (ta, transport, session)
}

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_large_stream() {
    let (ta, transport, session) = setup(Algorithm::Aes, 16, EngineConfig::default());
    let op = session.begin(KeyPurpose::Encrypt, b"keyblob", &[], None).unwrap();
    assert_eq!(op.algorithm, Algorithm::Aes);

    let input = data(50000);
    let result = session.update(op.handle, &[], &input, None).unwrap();
    assert_eq!(result.input_consumed, input.len());
    assert_eq!(result.output, input);
    assert_eq!(
        ta.lock().unwrap().chunks,
        vec![(0, 16384), (0, 16384), (0, 16384), (0, 848)]
    );

    let tail = data(1000);
    let result = session.finish(op.handle, &[], &tail, &[], None).unwrap();
    assert_eq!(&result.output[..1000], &tail[..]);
    assert_eq!(&result.output[1000..], &[0xf1; 16]);

    let mut want = vec![TciCommandCode::Begin];
    want.extend([TciCommandCode::Update; 4]);
    want.push(TciCommandCode::Finish);
    assert_eq!(transport.command_codes(), want);
    assert_eq!(transport.mapped(), 0);
    assert!(ta.lock().unwrap().open.is_empty());

    drop(session);
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_keymaster4_aad_before_input() {
    let config = EngineConfig {
        protocol: ProtocolVersion::Keymaster4,
        chunk_size: 16,
        ..Default::default()
    };
    let (ta, transport, session) = setup(Algorithm::Aes, 16, config);
    let op = session.begin(KeyPurpose::Encrypt, b"keyblob", &[], None).unwrap();

    let aad = data(40);
    let input = data(30);
    let params = vec![KeyParameter::bytes(Tag::AssociatedData, aad.clone())];
    let result = session.update(op.handle, &params, &input, None).unwrap();
    assert_eq!(result.output, input);
    {
        let ta = ta.lock().unwrap();
        assert_eq!(ta.chunks, vec![(16, 0), (16, 0), (8, 8), (0, 16), (0, 6)]);
        assert_eq!(ta.aad, aad);
    }

    let result = session.finish(op.handle, &[], &[], &[], None).unwrap();
    assert_eq!(result.output, vec![0xf1; 16]);

    let update = command_id(ProtocolVersion::Keymaster4, TciCommandCode::Update);
    let mut want = vec![0x0004_0006];
    want.extend([update; 5]);
    want.push(0x0004_0008);
    assert_eq!(transport.command_ids(), want);

    let err = session.update_aad(op.handle, b"aad", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unimplemented);
}

#[test]
fn test_keymint_update_aad() {
    let (ta, transport, session) = setup(Algorithm::Aes, 16, EngineConfig::default());
    let op = session.begin(KeyPurpose::Decrypt, b"keyblob", &[], None).unwrap();
    session.update_aad(op.handle, b"header", None).unwrap();
    session.update_aad(op.handle, b"more", None).unwrap();
    assert_eq!(ta.lock().unwrap().aad, b"headermore");
    assert!(transport
        .command_ids()
        .iter()
        .all(|id| id >> 16 == ProtocolVersion::KeyMint as u32));

    let params = vec![KeyParameter::bytes(Tag::AssociatedData, b"late".to_vec())];
    let err = session.update(op.handle, &params, b"data", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(session.operations().live(), 0);
}

#[test]
fn test_operation_table_exhaustion() {
    let (ta, _transport, session) = setup(Algorithm::Hmac, 32, EngineConfig::default());
    let ops: Vec<OpHandle> = (0..32)
        .map(|_| session.begin(KeyPurpose::Sign, b"keyblob", &[], None).unwrap().handle)
        .collect();
    let err = session.begin(KeyPurpose::Sign, b"keyblob", &[], None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TooManyOperations);
    // The TA's operation for the rejected begin has been aborted.
    assert_eq!(ta.lock().unwrap().open.len(), 32);

    session.abort(ops[5]).unwrap();
    let op = session.begin(KeyPurpose::Sign, b"keyblob", &[], None).unwrap();
    assert_eq!(session.operations().lookup(op.handle).unwrap().index(), 5);
}

#[test]
fn test_partial_consumption() {
    let config = EngineConfig { chunk_size: 16, ..Default::default() };
    let (ta, transport, session) = setup(Algorithm::Aes, 16, config);
    ta.lock().unwrap().max_consume = 10;
    let op = session.begin(KeyPurpose::Encrypt, b"keyblob", &[], None).unwrap();

    let input = data(100);
    let result = session.update(op.handle, &[], &input, None).unwrap();
    assert_eq!(result.input_consumed, 100);
    assert_eq!(result.output, input);

    // Intermediate updates leave input behind, which the final FINISH picks up.
    let input = data(40);
    let result = session.finish(op.handle, &[], &input, &[], None).unwrap();
    assert_eq!(&result.output[..40], &input[..]);
    assert_eq!(transport.command_codes().last(), Some(&TciCommandCode::Finish));
    assert_eq!(ta.lock().unwrap().chunks[10..], [(0, 16), (0, 16), (0, 16), (0, 10)]);
}

#[test]
fn test_abort_unknown_to_ta() {
    let (ta, transport, session) = setup(Algorithm::Aes, 16, EngineConfig::default());
    let op = session.begin(KeyPurpose::Encrypt, b"keyblob", &[], None).unwrap();
    ta.lock().unwrap().open.clear();

    let err = session.abort(op.handle).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOperationHandle);
    assert_eq!(session.operations().live(), 0);
    let sent = transport.command_codes().len();

    let err = session.abort(op.handle).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOperationHandle);
    assert_eq!(transport.command_codes().len(), sent);
}

#[test]
fn test_concurrent_operations() {
    let (ta, transport, session) = setup(Algorithm::Aes, 16, EngineConfig::default());
    let session = Arc::new(session);
    let workers: Vec<_> = (0..4u8)
        .map(|t| {
            let session = session.clone();
            std::thread::spawn(move || {
                for i in 0..10u8 {
                    let op = session.begin(KeyPurpose::Encrypt, b"keyblob", &[], None).unwrap();
                    let input = vec![t ^ i; 64];
                    let result = session.update(op.handle, &[], &input, None).unwrap();
                    assert_eq!(result.output, input);
                    let result = session.finish(op.handle, &[], &[], &[], None).unwrap();
                    assert_eq!(result.output, vec![0xf1; 16]);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(session.operations().live(), 0);
    assert!(ta.lock().unwrap().open.is_empty());
    assert_eq!(transport.mapped(), 0);
}
