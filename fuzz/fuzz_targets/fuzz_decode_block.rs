#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen::block::Block;
use lumen::wire::decode;

fuzz_target!(|data: &[u8]| {
    // decode parses a 4-byte LE length prefix followed by a size-limited
    // bincode payload. It must never panic on arbitrary input; anything it
    // cannot decode comes back as None.
    if let Some(block) = decode::<Block>(data) {
        // Decoded blocks must survive hashing and verification without
        // panicking, whatever their field values.
        let _ = block.hash();
        let _ = block.verify();
    }
});
