//! Utility program to parse a DER-encoded SecureKeyWrapper and show what would be sent to the TA.

use tkm_common::{
    params,
    wrapper::{parse_authorization_list, parse_secure_key_wrapper, RepeatedTagPolicy},
};
use tkm_wire::keymint::{Algorithm, KeyFormat};

fn main() {
    let mut hex = false;
    let mut policy = RepeatedTagPolicy::LastWins;
    let args: Vec<String> = std::env::args().collect();
    for arg in &args[1..] {
        match arg.as_str() {
            "--hex" => hex = !hex,
            "--strict" => policy = RepeatedTagPolicy::Reject,
            _ => process(arg, hex, policy),
        }
    }
}

fn process(filename: &str, hex: bool, policy: RepeatedTagPolicy) {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut data: Vec<u8> = match std::fs::read(filename) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}: Failed to read: {:?}", filename, e);
            return;
        }
    };
    if hex {
        let hexdata = match std::str::from_utf8(&data) {
            Ok(s) => s.trim(),
            Err(e) => {
                eprintln!("{}: Not text ({:?})", filename, e);
                return;
            }
        };
        data = match hex::decode(hexdata) {
            Ok(v) => v,
            Err(e) => {
                eprintln!(
                    "{}: Failed to parse hex ({:?}): len={} {}",
                    filename,
                    e,
                    hexdata.len(),
                    hexdata
                );
                return;
            }
        };
    }

    let wrapper = match parse_secure_key_wrapper(&data) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{}: Failed to parse: {:?}", filename, e);
            return;
        }
    };
    let auths = match parse_authorization_list(wrapper.authorization_list, policy) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}: Failed to parse authorization list: {:?}", filename, e);
            return;
        }
    };
    let key_format = KeyFormat::n(wrapper.key_format as i32);
    let algorithm = Algorithm::n(auths.key_type as i32);
    println!(
        "{}: SecureKeyWrapper {{\n  encrypted_transport_key=...(len {}),\n  iv={},\n  \
         key_format={:?} ({}),\n  encrypted_key=...(len {}),\n  tag={},\n}}",
        filename,
        wrapper.encrypted_transport_key.len(),
        hex::encode(wrapper.initialization_vector),
        key_format,
        wrapper.key_format,
        wrapper.encrypted_key.len(),
        hex::encode(wrapper.tag),
    );
    println!(
        "{}:  key_type={:?} ({}), secure_user_id={:#x}",
        filename, algorithm, auths.key_type, auths.secure_user_id
    );
    match params::deserialize(&auths.key_params) {
        Ok(key_params) => {
            for param in key_params {
                println!("{}:  {:?}", filename, param);
            }
        }
        Err(e) => eprintln!("{}: Failed to re-read key params: {:?}", filename, e),
    }
}
