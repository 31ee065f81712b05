#![no_main]

use libfuzzer_sys::fuzz_target;
use styx_core::{Atomic, Decode, Encode, IndexEntry, INDEX_ENTRY_SIZE};

fuzz_target!(|data: &[u8]| {
    // Walk the input as an index file, stopping at the first bad entry
    // the way segment recovery does.
    let mut rest = data;
    while !rest.is_empty() {
        let mut entry = IndexEntry::default();
        let Ok(n) = Atomic(&mut entry).decode(rest) else {
            break;
        };
        assert_eq!(n, INDEX_ENTRY_SIZE);

        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        Atomic(&entry).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &rest[..n]);
        rest = &rest[n..];
    }
});
