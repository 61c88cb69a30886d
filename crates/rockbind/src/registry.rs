//! Process-wide table of user callbacks reachable from native upcalls.
//!
//! The native engine only ever sees a [`Token`], passed as the opaque `state`
//! pointer of a callback object. Every upcall hands the token back and the
//! shims resolve it here. A registration lives until the native object's
//! destructor upcall removes it.

use rockbind_core::{
    AssociativeMergeOperator, Comparator, CompactionFilter, CompactionFilterFactory,
    CompactionFilterFactoryV2, CompactionFilterV2, FilterBitsBuilder, FilterBitsReader,
    FilterPolicy, MergeOperator, SliceTransform,
};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Identity of one registration. Never zero, never reused by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(NonZeroU64);

impl Token {
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The token as the `state` pointer handed to the native side.
    pub fn as_state(self) -> *mut libc::c_void {
        self.0.get() as usize as *mut libc::c_void
    }

    /// Recover a token from an upcall's `state` pointer.
    pub fn from_state(state: *mut libc::c_void) -> Option<Self> {
        NonZeroU64::new(state as usize as u64).map(Token)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered callback object, one variant per capability.
#[derive(Clone)]
pub enum Callback {
    Comparator(Arc<dyn Comparator>),
    FilterPolicy(Arc<dyn FilterPolicy>),
    /// A full-filter builder in use by one table build
    FilterBitsBuilder(Arc<Mutex<Box<dyn FilterBitsBuilder>>>),
    FilterBitsReader(Arc<dyn FilterBitsReader>),
    CompactionFilter(Arc<dyn CompactionFilter>),
    CompactionFilterV2(Arc<dyn CompactionFilterV2>),
    CompactionFilterFactory(Arc<dyn CompactionFilterFactory>),
    CompactionFilterFactoryV2(Arc<dyn CompactionFilterFactoryV2>),
    MergeOperator(Arc<dyn MergeOperator>),
    AssociativeMergeOperator(Arc<dyn AssociativeMergeOperator>),
    SliceTransform(Arc<dyn SliceTransform>),
}

impl Callback {
    pub fn kind(&self) -> &'static str {
        match self {
            Callback::Comparator(_) => "comparator",
            Callback::FilterPolicy(_) => "filter_policy",
            Callback::FilterBitsBuilder(_) => "filter_bits_builder",
            Callback::FilterBitsReader(_) => "filter_bits_reader",
            Callback::CompactionFilter(_) => "compaction_filter",
            Callback::CompactionFilterV2(_) => "compaction_filter_v2",
            Callback::CompactionFilterFactory(_) => "compaction_filter_factory",
            Callback::CompactionFilterFactoryV2(_) => "compaction_filter_factory_v2",
            Callback::MergeOperator(_) => "merge_operator",
            Callback::AssociativeMergeOperator(_) => "associative_merge_operator",
            Callback::SliceTransform(_) => "slice_transform",
        }
    }

    /// The user-facing name. Filter bits builders and readers have none.
    pub fn name(&self) -> String {
        match self {
            Callback::Comparator(c) => c.name().to_string(),
            Callback::FilterPolicy(p) => p.name().to_string(),
            Callback::FilterBitsBuilder(_) | Callback::FilterBitsReader(_) => String::new(),
            Callback::CompactionFilter(f) => f.name().to_string(),
            Callback::CompactionFilterV2(f) => f.name().to_string(),
            Callback::CompactionFilterFactory(f) => f.name().to_string(),
            Callback::CompactionFilterFactoryV2(f) => f.name().to_string(),
            Callback::MergeOperator(op) => op.name().to_string(),
            Callback::AssociativeMergeOperator(op) => op.name().to_string(),
            Callback::SliceTransform(t) => t.name().to_string(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.kind()).finish()
    }
}

/// Token-to-callback table.
pub struct Registry {
    next: AtomicU64,
    entries: Mutex<HashMap<Token, Callback>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The registry every shim resolves tokens against.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    // Only map operations run under the lock, so a poisoned map is still
    // consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<Token, Callback>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, callback: Callback) -> Token {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        // The counter starts at one and a u64 does not wrap in practice
        let token = Token(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN));
        tracing::debug!(%token, kind = callback.kind(), "registered callback");
        self.entries().insert(token, callback);
        token
    }

    /// Clone the callback out of the table. The lock is released before
    /// this returns.
    pub fn lookup(&self, token: Token) -> Option<Callback> {
        self.entries().get(&token).cloned()
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unregister(&self, token: Token) -> bool {
        let removed = self.entries().remove(&token);
        if let Some(callback) = &removed {
            tracing::debug!(%token, kind = callback.kind(), "unregistered callback");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries().contains_key(&token)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

macro_rules! typed_lookups {
    ($($fn:ident => $variant:ident: $ty:ty;)*) => {
        /// Typed lookups. A miss or a registration of another kind gives `None`.
        impl Registry {
            $(
                pub fn $fn(&self, token: Token) -> Option<$ty> {
                    match self.lookup(token)? {
                        Callback::$variant(callback) => Some(callback),
                        _ => None,
                    }
                }
            )*
        }
    };
}

typed_lookups! {
    comparator => Comparator: Arc<dyn Comparator>;
    filter_policy => FilterPolicy: Arc<dyn FilterPolicy>;
    filter_bits_builder => FilterBitsBuilder: Arc<Mutex<Box<dyn FilterBitsBuilder>>>;
    filter_bits_reader => FilterBitsReader: Arc<dyn FilterBitsReader>;
    compaction_filter => CompactionFilter: Arc<dyn CompactionFilter>;
    compaction_filter_v2 => CompactionFilterV2: Arc<dyn CompactionFilterV2>;
    compaction_filter_factory => CompactionFilterFactory: Arc<dyn CompactionFilterFactory>;
    compaction_filter_factory_v2 => CompactionFilterFactoryV2: Arc<dyn CompactionFilterFactoryV2>;
    slice_transform => SliceTransform: Arc<dyn SliceTransform>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rockbind_core::{BytewiseComparator, FixedPrefixTransform};
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = Registry::new();
        let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let token = registry.register(Callback::Comparator(Arc::clone(&cmp)));

        let found = registry.comparator(token).unwrap();
        assert!(Arc::ptr_eq(&found, &cmp));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(token));
        assert!(registry.lookup(token).is_none());
        assert!(!registry.unregister(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_kind_mismatch_misses() {
        let registry = Registry::new();
        let token = registry.register(Callback::SliceTransform(Arc::new(
            FixedPrefixTransform::new(2),
        )));
        assert!(registry.comparator(token).is_none());
        assert!(registry.slice_transform(token).is_some());
        assert_eq!(registry.lookup(token).unwrap().kind(), "slice_transform");
    }

    #[test]
    fn test_token_state_roundtrip() {
        let registry = Registry::new();
        let token = registry.register(Callback::Comparator(Arc::new(BytewiseComparator)));
        assert_eq!(Token::from_state(token.as_state()), Some(token));
        assert_eq!(Token::from_state(std::ptr::null_mut()), None);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..64)
                        .map(|_| {
                            registry.register(Callback::Comparator(Arc::new(BytewiseComparator)))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let tokens: Vec<Token> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        let distinct: HashSet<_> = tokens.iter().copied().collect();
        assert_eq!(distinct.len(), 8 * 64);

        let readers: Vec<_> = tokens
            .chunks(64)
            .map(|chunk| {
                let registry = Arc::clone(&registry);
                let chunk = chunk.to_vec();
                thread::spawn(move || chunk.iter().all(|&t| registry.comparator(t).is_some()))
            })
            .collect();
        assert!(readers.into_iter().all(|r| r.join().unwrap()));
    }
}
