#![no_main]

use libfuzzer_sys::fuzz_target;
use rockbind_native::log::LogRecord;

fuzz_target!(|data: &[u8]| {
    // Corrupt frames are rejected by length or checksum, never a panic
    if let Ok((record, consumed)) = LogRecord::decode(data) {
        assert!(consumed <= data.len());
        if let Ok(encoded) = record.encode() {
            let _ = LogRecord::decode(&encoded);
        }
    }
});
