//! Fuzzer for TA response parsing.

#![no_main]
use libfuzzer_sys::fuzz_target;
use tkm_wire::tci::{command_id, deserialize_response, ProtocolVersion, TciCommandCode};

fuzz_target!(|data: &[u8]| {
    // The response buffer is written by the secure side, but a mangled one must still only ever
    // produce an error.
    for code in [
        TciCommandCode::Begin,
        TciCommandCode::Update,
        TciCommandCode::UpdateAad,
        TciCommandCode::Finish,
        TciCommandCode::Abort,
        TciCommandCode::ImportWrappedKey,
        TciCommandCode::AddRngEntropy,
        TciCommandCode::GenerateKey,
        TciCommandCode::GetKeyCharacteristics,
        TciCommandCode::ImportKey,
        TciCommandCode::GetKeyInfo,
        TciCommandCode::ExportKey,
        TciCommandCode::UpgradeKey,
        TciCommandCode::DeleteKey,
        TciCommandCode::DeleteAllKeys,
    ] {
        let _ = deserialize_response(command_id(ProtocolVersion::KeyMint, code), data);
    }
    let _ = tkm_wire::tci::TciCommand::from_slice(data);
});
