#![no_main]

use libfuzzer_sys::fuzz_target;
use tds5_protocol::{PacketHeader, reassemble};

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    let _ = PacketHeader::decode(&mut cursor);

    // Whole streams of packets, including truncated and oversized ones.
    let _ = reassemble(data);
});
