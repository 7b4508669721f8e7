#![no_main]

use ase_client::ConnectionParameters;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(params) = ConnectionParameters::parse(s) {
            let _ = params.identity();
        }
    }
});
