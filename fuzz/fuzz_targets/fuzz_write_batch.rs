#![no_main]

use libfuzzer_sys::fuzz_target;
use rockbind::WriteBatch;

fuzz_target!(|data: &[u8]| {
    // Decoding must fail cleanly or yield a batch that re-encodes losslessly
    if let Ok(batch) = WriteBatch::from_data(data) {
        let encoded = batch.data().expect("decoded batch must encode");
        let again = WriteBatch::from_data(&encoded).expect("re-encoded batch must decode");
        assert_eq!(batch.count(), again.count());
    }
});
