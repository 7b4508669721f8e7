#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds5_protocol::LoginRecord;

fuzz_target!(|data: &[u8]| {
    let mut bytes = Bytes::copy_from_slice(data);
    if let Ok(record) = LoginRecord::decode(&mut bytes) {
        // Anything that decodes must encode again.
        let _ = record.encode();
    }
});
