#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen::accounts::{AccountsTreeChunk, PartialAccountsTree};
use lumen::wire::decode;

fuzz_target!(|data: &[u8]| {
    // Accounts chunks stream from untrusted peers; ordering violations and
    // root mismatches must surface as result codes, never as panics.
    if let Some(chunk) = decode::<AccountsTreeChunk>(data) {
        let mut partial = PartialAccountsTree::new([0u8; 32]);
        let _ = partial.push_chunk(&chunk);
        let _ = partial.missing_prefix();
    }
});
