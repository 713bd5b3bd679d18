//! What changed in a document since it was read.
//!
//! [`ModificationContext`] is a plain value: every update returns a new context. Contexts merge
//! by set union and flag OR, with [`ModificationContext::clean`] as the identity.

use std::collections::BTreeSet;

use tabula_model::moved_index;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModificationContext {
    modified: BTreeSet<usize>,
    deleted: BTreeSet<usize>,
    reordered: bool,
    metadata_changed: bool,
}

impl ModificationContext {
    /// Nothing changed.
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self == &Self::clean()
    }

    pub fn modified(&self) -> &BTreeSet<usize> {
        &self.modified
    }

    pub fn deleted(&self) -> &BTreeSet<usize> {
        &self.deleted
    }

    pub fn reordered(&self) -> bool {
        self.reordered
    }

    pub fn metadata_changed(&self) -> bool {
        self.metadata_changed
    }

    pub fn is_sheet_modified(&self, index: usize) -> bool {
        self.modified.contains(&index)
    }

    pub fn mark_sheet(mut self, index: usize) -> Self {
        self.modified.insert(index);
        self
    }

    /// Record the deletion of the sheet at `index`. Modified indices above it shift down by one
    /// so they keep naming the same sheets.
    pub fn mark_deleted(mut self, index: usize) -> Self {
        self.modified = self
            .modified
            .into_iter()
            .filter(|&i| i != index)
            .map(|i| if i > index { i - 1 } else { i })
            .collect();
        self.deleted.insert(index);
        self
    }

    pub fn mark_reordered(mut self) -> Self {
        self.reordered = true;
        self
    }

    pub fn mark_metadata(mut self) -> Self {
        self.metadata_changed = true;
        self
    }

    /// Record a sheet move; modified indices follow the sheets they name.
    pub fn moved(mut self, from: usize, to: usize) -> Self {
        self.modified = self
            .modified
            .into_iter()
            .map(|i| moved_index(i, from, to))
            .collect();
        self.mark_reordered()
    }

    pub fn merge(mut self, other: &Self) -> Self {
        self.modified.extend(other.modified.iter().copied());
        self.deleted.extend(other.deleted.iter().copied());
        self.reordered |= other.reordered;
        self.metadata_changed |= other.metadata_changed;
        self
    }

    /// Whether workbook-level parts (manifest, relationships) need regenerating.
    pub fn workbook_changed(&self) -> bool {
        self.reordered || self.metadata_changed || !self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_context() -> impl Strategy<Value = ModificationContext> {
        (
            proptest::collection::btree_set(0usize..16, 0..6),
            proptest::collection::btree_set(0usize..16, 0..3),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(modified, deleted, reordered, metadata_changed)| {
                ModificationContext {
                    modified,
                    deleted,
                    reordered,
                    metadata_changed,
                }
            })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_context(), b in arb_context()) {
            prop_assert_eq!(a.clone().merge(&b), b.merge(&a));
        }

        #[test]
        fn clean_is_the_identity(m in arb_context()) {
            prop_assert_eq!(m.clone().merge(&ModificationContext::clean()), m.clone());
            prop_assert_eq!(ModificationContext::clean().merge(&m), m);
        }

        #[test]
        fn merge_is_associative(a in arb_context(), b in arb_context(), c in arb_context()) {
            prop_assert_eq!(
                a.clone().merge(&b).merge(&c),
                a.merge(&b.merge(&c))
            );
        }
    }

    #[test]
    fn delete_renumbers_higher_indices() {
        let ctx = ModificationContext::clean()
            .mark_sheet(1)
            .mark_sheet(3)
            .mark_sheet(4)
            .mark_deleted(3);
        assert_eq!(ctx.modified().iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert!(ctx.deleted().contains(&3));
        assert!(ctx.workbook_changed());
    }

    #[test]
    fn move_remaps_modified_indices() {
        let ctx = ModificationContext::clean().mark_sheet(0).mark_sheet(2).moved(0, 2);
        assert_eq!(ctx.modified().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(ctx.reordered());
    }

    #[test]
    fn clean_context_reports_clean() {
        assert!(ModificationContext::clean().is_clean());
        assert!(!ModificationContext::clean().mark_metadata().is_clean());
    }
}
