//! Fuzz target for DID and key reference parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oob_core::{DidReference, KeyReference};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(did) = input.parse::<DidReference>() {
            assert_eq!(did.to_string().parse::<DidReference>().ok(), Some(did));
        }
        let _ = input.parse::<KeyReference>();
    }
});
