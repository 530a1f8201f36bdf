//! Fuzzer for parameter set decoding.

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(params) = tkm_common::params::deserialize(data) {
        let _ = tkm_common::params::serialize(&params, None, None);
    }
    let _ = tkm_common::params::deserialize_characteristics(data);
    let _ = tkm_common::params::deserialize_cert_chain(data);
});
