#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen::chain::proof::{verify_proof, ChainProof};
use lumen::constants;
use lumen::wire::decode;

fuzz_target!(|data: &[u8]| {
    // Chain proofs are the largest untrusted payload the synchronizer
    // accepts. Decoding and verification must be panic-free on garbage.
    if let Some(proof) = decode::<ChainProof>(data) {
        let _ = verify_proof(&proof, constants::K);
    }
});
