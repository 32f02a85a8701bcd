//! The five homes of a mapping.
//!
//! Every mapping object is owned by exactly one collection. Moving it means
//! moving the value out of one `Vec` and into another while both locks are
//! held, so it is never reachable from two places and never from none.
//!
//! Lock order: `active → pending → failed → to_delete → zombies`.
//! No caller holds more than two of them.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::mapping::{Mapping, MappingSpec};

#[derive(Default)]
pub(crate) struct Collections {
    pub(crate) active: Mutex<Vec<Mapping>>,
    pub(crate) pending: Mutex<VecDeque<MappingSpec>>,
    pub(crate) failed: Mutex<Vec<Mapping>>,
    pub(crate) to_delete: Mutex<Vec<Mapping>>,
    pub(crate) zombies: Mutex<Vec<Mapping>>,
}

/// Moves every element matching `pred` out of `v`, preserving the order of both halves.
pub(crate) fn take_where<T>(v: &mut Vec<T>, pred: impl FnMut(&T) -> bool) -> Vec<T> {
    let (taken, kept): (Vec<T>, Vec<T>) = std::mem::take(v).into_iter().partition(pred);
    *v = kept;
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_where_keeps_order() {
        let mut v = vec![1, 2, 3, 4, 5, 6];
        let even = take_where(&mut v, |x| x % 2 == 0);
        assert_eq!(even, vec![2, 4, 6]);
        assert_eq!(v, vec![1, 3, 5]);
    }
}
