#![no_main]

use libfuzzer_sys::fuzz_target;
use styx_core::{Atomic, BufferedReader, Decode, Encode, IoMode, Record};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a checksummed record. Decoding must never panic:
    // - Negative or huge size prefixes
    // - Truncated payloads and trailers
    // - Checksum mismatches
    let mut record = Record::default();
    if let Ok(n) = Atomic(&mut record).decode(data) {
        // Whatever decodes must encode back to the same bytes
        let framed = Atomic(&record);
        assert_eq!(framed.encoded_size(), n);
        let mut buf = vec![0u8; n];
        assert_eq!(framed.encode(&mut buf).unwrap(), n);
        assert_eq!(&buf[..], &data[..n]);
    }

    // The same bytes as a records file behind a small buffer
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut reader = BufferedReader::new(data, 64, IoMode::Auto);
        let mut consumed = 0;
        while let Ok(n) = reader.read(&mut Atomic(&mut record)).await {
            consumed += n;
        }
        assert!(consumed <= data.len());
    });
});
