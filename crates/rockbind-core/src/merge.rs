//! Merge operators.
//!
//! A merge writes an operand instead of a value. The engine collects the
//! operands of a key and asks the operator to fold them into a value on read
//! and during compaction.

/// Read-modify-write operator over raw values.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    /// Fold `operands` (oldest first) onto `existing_value`.
    ///
    /// `None` signals failure; the engine reports a corruption status.
    fn full_merge(
        &self,
        key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>>;

    /// Combine two adjacent operands into one. `None` means the operands
    /// cannot be combined and must be kept apart.
    fn partial_merge(&self, _key: &[u8], _left: &[u8], _right: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Combine a run of operands into one.
    fn partial_merge_multi(&self, key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
        let (first, rest) = operands.split_first()?;
        if rest.is_empty() {
            return None;
        }
        let mut acc = first.to_vec();
        for operand in rest {
            acc = self.partial_merge(key, &acc, operand)?;
        }
        Some(acc)
    }
}

/// Merge operator whose operands and values share one type, so any two
/// operands can always be combined.
pub trait AssociativeMergeOperator: Send + Sync {
    fn name(&self) -> &str;

    /// Combine `value` into `existing_value`. `None` signals failure.
    fn merge(&self, key: &[u8], existing_value: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>>;
}

/// Full merge expressed through an associative operator.
pub fn associative_full_merge(
    op: &dyn AssociativeMergeOperator,
    key: &[u8],
    existing_value: Option<&[u8]>,
    operands: &[&[u8]],
) -> Option<Vec<u8>> {
    let mut acc = existing_value.map(<[u8]>::to_vec);
    for operand in operands {
        acc = Some(op.merge(key, acc.as_deref(), operand)?);
    }
    acc
}

/// Partial merge expressed through an associative operator.
pub fn associative_partial_merge(
    op: &dyn AssociativeMergeOperator,
    key: &[u8],
    left: &[u8],
    right: &[u8],
) -> Option<Vec<u8>> {
    op.merge(key, Some(left), right)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Concat;

    impl MergeOperator for Concat {
        fn name(&self) -> &str {
            "concat"
        }

        fn full_merge(
            &self,
            _key: &[u8],
            existing: Option<&[u8]>,
            ops: &[&[u8]],
        ) -> Option<Vec<u8>> {
            let mut out = existing.unwrap_or_default().to_vec();
            for op in ops {
                out.extend_from_slice(op);
            }
            Some(out)
        }

        fn partial_merge(&self, _key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
            Some([left, right].concat())
        }
    }

    struct Add;

    impl AssociativeMergeOperator for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn merge(&self, _key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
            let base = existing.map(|v| v[0]).unwrap_or(0);
            Some(vec![base.checked_add(*value.first()?)?])
        }
    }

    #[test]
    fn test_partial_merge_multi_folds() {
        let ops: [&[u8]; 3] = [b"a", b"b", b"c"];
        assert_eq!(Concat.partial_merge_multi(b"k", &ops), Some(b"abc".to_vec()));
        assert_eq!(Concat.partial_merge_multi(b"k", &ops[..1]), None);
    }

    #[test]
    fn test_associative_full_merge() {
        let ops: [&[u8]; 2] = [&[2], &[3]];
        assert_eq!(associative_full_merge(&Add, b"k", Some(&[1]), &ops), Some(vec![6]));
        assert_eq!(associative_full_merge(&Add, b"k", None, &ops), Some(vec![5]));
        // Empty operand fails the whole merge
        let bad: [&[u8]; 1] = [&[]];
        assert_eq!(associative_full_merge(&Add, b"k", None, &bad), None);
    }
}
