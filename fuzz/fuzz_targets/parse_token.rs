#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tds5_protocol::{ByteOrder, Charset, TokenContext, TokenParser};

#[derive(Debug, Arbitrary)]
struct Input {
    big_endian: bool,
    utf8: bool,
    /// Split point, so tokens straddle two pushes.
    split: usize,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let order = if input.big_endian {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };
    let charset = if input.utf8 {
        Charset::from_name("utf8").unwrap_or_default()
    } else {
        Charset::default()
    };
    let mut parser = TokenParser::new(TokenContext::new(order, charset));

    let split = input.split.min(input.data.len());
    let (head, tail) = input.data.split_at(split);
    parser.push(head);
    while let Ok(Some(_)) = parser.next_token() {}
    parser.push(tail);
    while let Ok(Some(_)) = parser.next_token() {}
    let _ = parser.finish();
});
