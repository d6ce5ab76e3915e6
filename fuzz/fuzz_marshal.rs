//! Fuzz target for value text encoding and byte decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_marshal
//!
//! The first byte picks a type; the rest is used both as value text and as a
//! raw buffer. Anything that encodes must fit the declared size and decode
//! again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use plcwarden_core::marshal;

const TYPES: &[&str] = &[
    "BOOL", "BYTE", "WORD", "DWORD", "LWORD", "SINT", "USINT", "INT", "UINT", "DINT", "UDINT",
    "LINT", "ULINT", "REAL", "LREAL", "STRING", "STRING(10)", "ST_Unknown",
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let type_name = TYPES[selector as usize % TYPES.len()];
    let entry = marshal::lookup(type_name);

    let _ = entry.decode(rest);

    let Ok(text) = std::str::from_utf8(rest) else {
        return;
    };
    let size = marshal::declared_size(type_name).unwrap_or(rest.len().max(1));
    if let Ok(bytes) = entry.encode(text, size) {
        assert!(bytes.len() <= size);
        let mut padded = bytes;
        padded.resize(size, 0);
        assert!(entry.decode(&padded).is_ok());
    }
});
