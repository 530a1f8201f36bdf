//! Fuzzer for wrapped key parsing.

#![no_main]
use libfuzzer_sys::fuzz_target;
use tkm_common::wrapper::{parse_authorization_list, parse_secure_key_wrapper, RepeatedTagPolicy};

fuzz_target!(|data: &[u8]| {
    // `data` is a SecureKeyWrapper handed over by the caller, who may not be well-behaved.
    if let Ok(wrapper) = parse_secure_key_wrapper(data) {
        let _ = parse_authorization_list(wrapper.authorization_list, RepeatedTagPolicy::LastWins);
        let _ = parse_authorization_list(wrapper.authorization_list, RepeatedTagPolicy::Reject);
    }
    let _ = parse_authorization_list(data, RepeatedTagPolicy::LastWins);
});
