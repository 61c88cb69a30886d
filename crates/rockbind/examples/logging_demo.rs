use rockbind::logging::LogConfig;
use rockbind::{BytewiseComparator, NativeComparator, Options, ReadOptions, WriteOptions, DB};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Debug level plus registry and handle lifecycle events
    let _guard = LogConfig::debug().with_lifecycle_tracing(true).init()?;

    println!("=== rockbind Logging Demo ===\n");
    let dir = tempfile::tempdir()?;

    println!("1. Registering a comparator (logs the new token)...");
    let cmp = NativeComparator::new(BytewiseComparator);
    let mut opts = Options::new();
    opts.set_create_if_missing(true);
    opts.set_comparator(&cmp)?;

    println!("\n2. Opening the database...");
    let db = DB::open(&opts, dir.path())?;
    drop(cmp);

    println!("\n3. Writing and reading...");
    db.put(&WriteOptions::new(), b"user:1", b"Alice")?;
    if let Some(value) = db.get(&ReadOptions::new(), b"user:1")? {
        println!("Found: {}", String::from_utf8_lossy(&value));
    }

    println!("\n4. Closing (logs handle releases and the unregistration)...");
    drop(opts);
    drop(db);

    println!("\n=== Demo Complete ===");
    Ok(())
}
