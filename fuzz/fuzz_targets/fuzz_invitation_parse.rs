//! Fuzz target for invitation parsing.
//!
//! Received invitations are untrusted. Parsing must return an error for
//! anything malformed and never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use oob_invitation::parser;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Whatever parses must survive re-serialization.
        if let Ok(invitation) = parser::parse_str(input)
            && let Ok(value) = invitation.to_json()
        {
            assert!(parser::parse(&value).is_ok());
        }
        let _ = parser::parse_url(input);
    }
});
