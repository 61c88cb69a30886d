use super::{destructor, guarded, name, resolve};
use crate::marshal::{malloc_bytes, slice, slices};
use crate::registry::{Callback, Registry, Token};
use libc::{c_char, c_int, c_uchar, c_void, size_t};
use rockbind_core::{
    associative_full_merge, associative_partial_merge, AssociativeMergeOperator, MergeOperator,
};
use rockbind_native as ffi;
use std::ptr;
use std::sync::Arc;

pub(crate) fn create(op: Arc<dyn MergeOperator>) -> (Token, *mut ffi::rb_mergeoperator_t) {
    register(Callback::MergeOperator(op))
}

pub(crate) fn create_associative(
    op: Arc<dyn AssociativeMergeOperator>,
) -> (Token, *mut ffi::rb_mergeoperator_t) {
    register(Callback::AssociativeMergeOperator(op))
}

fn register(callback: Callback) -> (Token, *mut ffi::rb_mergeoperator_t) {
    let token = Registry::global().register(callback);
    let raw = unsafe {
        ffi::rb_mergeoperator_create(
            token.as_state(),
            Some(destructor),
            Some(full_merge),
            Some(partial_merge),
            Some(partial_merge_multi),
            Some(name),
        )
    };
    (token, raw)
}

/// Either kind of merge operator behind one token.
enum Merger {
    Full(Arc<dyn MergeOperator>),
    Associative(Arc<dyn AssociativeMergeOperator>),
}

impl Merger {
    fn lookup(registry: &Registry, token: Token) -> Option<Merger> {
        match registry.lookup(token)? {
            Callback::MergeOperator(op) => Some(Merger::Full(op)),
            Callback::AssociativeMergeOperator(op) => Some(Merger::Associative(op)),
            _ => None,
        }
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        match self {
            Merger::Full(op) => op.full_merge(key, existing, operands),
            Merger::Associative(op) => associative_full_merge(op.as_ref(), key, existing, operands),
        }
    }

    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        match self {
            Merger::Full(op) => op.partial_merge(key, left, right),
            Merger::Associative(op) => associative_partial_merge(op.as_ref(), key, left, right),
        }
    }

    fn partial_merge_multi(&self, key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
        match self {
            Merger::Full(op) => op.partial_merge_multi(key, operands),
            Merger::Associative(op) => {
                let (first, rest) = operands.split_first()?;
                rest.iter().try_fold(first.to_vec(), |acc, operand| {
                    associative_partial_merge(op.as_ref(), key, &acc, operand)
                })
            }
        }
    }
}

/// Report a merge result. `None` (failure, miss or panic) sets `success`
/// to false and returns null.
unsafe fn merge_result(
    result: Option<Vec<u8>>,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char {
    let out = result.map_or(ptr::null_mut(), |value| malloc_bytes(&value, new_value_len));
    if !success.is_null() {
        *success = !out.is_null() as c_uchar;
    }
    out
}

fn count(n: c_int) -> usize {
    usize::try_from(n).unwrap_or(0)
}

pub(crate) unsafe extern "C" fn full_merge(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    existing_value: *const c_char,
    existing_value_len: size_t,
    operands: *const *const c_char,
    operand_lens: *const size_t,
    num_operands: c_int,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char {
    let key = slice(key, key_len);
    let existing = (!existing_value.is_null()).then(|| slice(existing_value, existing_value_len));
    let operands = slices(operands, operand_lens, count(num_operands));
    let result = guarded("merge_operator.full_merge", None, || {
        resolve("merge_operator.full_merge", state, Merger::lookup)
            .and_then(|op| op.full_merge(key, existing, &operands))
    });
    merge_result(result, success, new_value_len)
}

pub(crate) unsafe extern "C" fn partial_merge(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    left: *const c_char,
    left_len: size_t,
    right: *const c_char,
    right_len: size_t,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char {
    let (key, left, right) = (slice(key, key_len), slice(left, left_len), slice(right, right_len));
    let result = guarded("merge_operator.partial_merge", None, || {
        resolve("merge_operator.partial_merge", state, Merger::lookup)
            .and_then(|op| op.partial_merge(key, left, right))
    });
    merge_result(result, success, new_value_len)
}

pub(crate) unsafe extern "C" fn partial_merge_multi(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    operands: *const *const c_char,
    operand_lens: *const size_t,
    num_operands: c_int,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char {
    let key = slice(key, key_len);
    let operands = slices(operands, operand_lens, count(num_operands));
    let result = guarded("merge_operator.partial_merge_multi", None, || {
        resolve("merge_operator.partial_merge_multi", state, Merger::lookup)
            .and_then(|op| op.partial_merge_multi(key, &operands))
    });
    merge_result(result, success, new_value_len)
}
