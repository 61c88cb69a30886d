#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rockbind::{
    AssociativeMergeOperator, FlushOptions, NativeMergeOperator, Options, ReadOptions,
    WriteOptions, DB,
};

#[derive(Arbitrary, Debug)]
enum DbOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Merge { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Delete { key: Vec<u8> },
    Flush,
    Compact,
}

struct Append;

impl AssociativeMergeOperator for Append {
    fn name(&self) -> &str {
        "fuzz.Append"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        let mut out = existing.unwrap_or_default().to_vec();
        out.extend_from_slice(value);
        (out.len() <= 1 << 16).then_some(out)
    }
}

fuzz_target!(|ops: Vec<DbOp>| {
    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let mut opts = Options::new();
    opts.set_create_if_missing(true);
    if opts.set_merge_operator(&NativeMergeOperator::associative(Append)).is_err() {
        return;
    }
    let Ok(db) = DB::open(&opts, dir.path()) else {
        return;
    };
    let (read, write) = (ReadOptions::new(), WriteOptions::new());

    for op in ops.iter().take(100) {
        match op {
            DbOp::Put { key, value } if key.len() <= 1024 && value.len() <= 1024 => {
                let _ = db.put(&write, key, value);
            }
            DbOp::Merge { key, value } if key.len() <= 1024 && value.len() <= 1024 => {
                let _ = db.merge(&write, key, value);
            }
            DbOp::Get { key } => {
                let _ = db.get(&read, key);
            }
            DbOp::Delete { key } => {
                let _ = db.delete(&write, key);
            }
            DbOp::Flush => {
                let _ = db.flush(&FlushOptions::new());
            }
            DbOp::Compact => {
                let _ = db.compact_range(None, None);
            }
            _ => {}
        }
    }
});
