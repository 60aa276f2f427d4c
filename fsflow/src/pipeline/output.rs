//! Pipeline results.

use crate::errors::FlowError;

/// Outcome for one surviving input item.
#[derive(Debug)]
pub struct ItemResult<O> {
    /// Position of the item in the input.
    pub index: usize,
    /// The transformed value, or the item's failure.
    pub outcome: Result<O, FlowError>,
}

impl<O> ItemResult<O> {
    /// Whether the item succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Ordered results of [`Pipeline::execute`](super::Pipeline::execute).
///
/// Filtered items are absent. Survivors appear in input order.
#[derive(Debug)]
pub struct PipelineOutput<O> {
    items: Vec<ItemResult<O>>,
}

impl<O> PipelineOutput<O> {
    pub(super) fn new(items: Vec<ItemResult<O>>) -> Self {
        Self { items }
    }

    /// Number of surviving items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Per-item results in input order.
    #[must_use]
    pub fn items(&self) -> &[ItemResult<O>] {
        &self.items
    }

    /// Successful values in input order.
    pub fn successes(&self) -> impl Iterator<Item = &O> {
        self.items.iter().filter_map(|item| item.outcome.as_ref().ok())
    }

    /// Failures with their input positions.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &FlowError)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().err().map(|err| (item.index, err)))
    }

    /// Whether any item failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| item.outcome.is_err())
    }

    /// All values in input order, or the failure of the earliest failed item.
    ///
    /// # Errors
    ///
    /// Returns the error of the lowest-index failed item.
    pub fn into_values(self) -> Result<Vec<O>, FlowError> {
        self.items.into_iter().map(|item| item.outcome).collect()
    }
}

impl<O> IntoIterator for PipelineOutput<O> {
    type Item = ItemResult<O>;
    type IntoIter = std::vec::IntoIter<ItemResult<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
