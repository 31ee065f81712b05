#![no_main]

use libfuzzer_sys::fuzz_target;
use styx_log::LogConfig;

fuzz_target!(|data: &[u8]| {
    // A config that passes its checksum must survive a re-encode
    if let Ok(config) = LogConfig::decode(data) {
        assert_eq!(LogConfig::decode(&config.encode()).unwrap(), config);
    }
});
