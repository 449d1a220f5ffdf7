// ── One-or-many reference sets ──
//
// Immutable set of shared references, specialized for the single-member
// case. Writers build a new set and swap it in; readers iterate whatever
// snapshot they loaded.

use std::sync::Arc;

/// An immutable, duplicate-free set of `Arc<T>` compared by pointer identity.
///
/// Used for a link's views, a view's observers, and reconciliation outputs.
/// The `One` variant avoids a vector allocation for the common
/// single-subscriber case.
pub enum Fanout<T: ?Sized> {
    Empty,
    One(Arc<T>),
    Many(Vec<Arc<T>>),
}

impl<T: ?Sized> Default for Fanout<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T: ?Sized> Clone for Fanout<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::One(item) => Self::One(Arc::clone(item)),
            Self::Many(items) => Self::Many(items.clone()),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Fanout<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout").field("len", &self.len()).finish()
    }
}

pub(crate) fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<T: ?Sized> Fanout<T> {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&Arc<T>> {
        match self {
            Self::Empty => None,
            Self::One(item) => (index == 0).then_some(item),
            Self::Many(items) => items.get(index),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        let (one, many) = match self {
            Self::Empty => (None, &[][..]),
            Self::One(item) => (Some(item), &[][..]),
            Self::Many(items) => (None, items.as_slice()),
        };
        one.into_iter().chain(many.iter())
    }

    pub fn contains(&self, item: &Arc<T>) -> bool {
        self.iter().any(|member| same(member, item))
    }

    /// Copy of this set with `item` appended. Returns an unchanged copy when
    /// the item is already a member.
    pub fn with(&self, item: &Arc<T>) -> Self {
        match self {
            Self::Empty => Self::One(Arc::clone(item)),
            Self::One(existing) if same(existing, item) => self.clone(),
            Self::One(existing) => Self::Many(vec![Arc::clone(existing), Arc::clone(item)]),
            Self::Many(items) => {
                if self.contains(item) {
                    return self.clone();
                }
                let mut items = items.clone();
                items.push(Arc::clone(item));
                Self::Many(items)
            }
        }
    }

    /// Copy of this set with `item` removed, collapsing to `One` or `Empty`.
    pub fn without(&self, item: &Arc<T>) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::One(existing) if same(existing, item) => Self::Empty,
            Self::One(_) => self.clone(),
            Self::Many(items) => {
                let mut remaining: Vec<Arc<T>> = items
                    .iter()
                    .filter(|member| !same(member, item))
                    .cloned()
                    .collect();
                match remaining.len() {
                    0 => Self::Empty,
                    1 => remaining.pop().map_or(Self::Empty, Self::One),
                    _ => Self::Many(remaining),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_member_stays_unboxed() {
        let a = Arc::new(1);
        let set = Fanout::Empty.with(&a);
        assert!(matches!(set, Fanout::One(_)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicates_are_ignored() {
        let a = Arc::new(1);
        let b = Arc::new(2);
        let set = Fanout::Empty.with(&a).with(&b).with(&a);
        assert_eq!(set.len(), 2);
        let set = Fanout::Empty.with(&a).with(&a);
        assert!(matches!(set, Fanout::One(_)));
    }

    #[test]
    fn identity_not_equality() {
        let a = Arc::new(1);
        let twin = Arc::new(1);
        let set = Fanout::Empty.with(&a);
        assert!(!set.contains(&twin));
        assert_eq!(set.with(&twin).len(), 2);
    }

    #[test]
    fn removal_collapses() {
        let a = Arc::new("a");
        let b = Arc::new("b");
        let c = Arc::new("c");
        let set = Fanout::Empty.with(&a).with(&b).with(&c);
        let set = set.without(&b);
        assert_eq!(set.iter().map(|s| **s).collect::<Vec<_>>(), vec!["a", "c"]);
        let set = set.without(&a);
        assert!(matches!(set, Fanout::One(_)));
        assert!(set.without(&c).is_empty());
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let items: Vec<Arc<usize>> = (0..5).map(Arc::new).collect();
        let set = items.iter().fold(Fanout::Empty, |set, item| set.with(item));
        let seen: Vec<usize> = set.iter().map(|i| **i).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(set.get(4).map(|i| **i), Some(4));
        assert!(set.get(5).is_none());
    }

    #[test]
    fn unsized_members() {
        let a: Arc<dyn Fn() -> u8 + Send + Sync> = Arc::new(|| 1);
        let set = Fanout::Empty.with(&a);
        assert!(set.contains(&a));
        assert!(set.without(&a).is_empty());
    }
}
