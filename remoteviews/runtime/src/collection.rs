//! Materialized collection snapshots handed to adapter views.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cache::CacheHandle;
use crate::error::ValidationError;
use crate::remote_views::{ApplyFlags, RemoteViews};

/// A bounded list of item trees with their ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCollectionItems {
    ids: Vec<i64>,
    views: Vec<RemoteViews>,
    has_stable_ids: bool,
    view_type_count: usize,
}

impl RemoteCollectionItems {
    pub fn builder() -> RemoteCollectionItemsBuilder {
        RemoteCollectionItemsBuilder::default()
    }

    /// Zero items, one view type.
    pub fn empty() -> Self {
        Self {
            view_type_count: 1,
            ..Self::default()
        }
    }

    pub fn item_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn item_id(&self, position: usize) -> Option<i64> {
        self.ids.get(position).copied()
    }

    pub fn item_view(&self, position: usize) -> Option<&RemoteViews> {
        self.views.get(position)
    }

    pub fn items(&self) -> impl Iterator<Item = (i64, &RemoteViews)> + '_ {
        self.ids.iter().copied().zip(self.views.iter())
    }

    pub fn has_stable_ids(&self) -> bool {
        self.has_stable_ids
    }

    pub fn view_type_count(&self) -> usize {
        self.view_type_count
    }

    pub(crate) fn views(&self) -> &[RemoteViews] {
        &self.views
    }

    pub(crate) fn views_mut(&mut self) -> &mut [RemoteViews] {
        &mut self.views
    }

    pub(crate) fn set_hierarchy_root(&mut self, root: &CacheHandle) {
        for view in &mut self.views {
            view.set_hierarchy_root(root);
        }
    }
}

#[derive(Debug, Default)]
pub struct RemoteCollectionItemsBuilder {
    ids: Vec<i64>,
    views: Vec<RemoteViews>,
    has_stable_ids: bool,
    view_type_count: Option<usize>,
}

impl RemoteCollectionItemsBuilder {
    /// Appends an item; its tree is marked as a collection child.
    pub fn add_item(mut self, id: i64, mut view: RemoteViews) -> Self {
        view.add_flags(ApplyFlags::COLLECTION_CHILD);
        self.ids.push(id);
        self.views.push(view);
        self
    }

    pub fn set_has_stable_ids(mut self, has_stable_ids: bool) -> Self {
        self.has_stable_ids = has_stable_ids;
        self
    }

    /// Number of distinct layouts the adapter should expect; defaults to the
    /// number of distinct layouts among the items.
    pub fn set_view_type_count(mut self, count: usize) -> Self {
        self.view_type_count = Some(count);
        self
    }

    pub fn build(self) -> Result<RemoteCollectionItems, ValidationError> {
        if self.views.iter().any(RemoteViews::has_multiple_layouts) {
            return Err(ValidationError::InvalidCollection(
                "collection items can't hold size or orientation variants".to_string(),
            ));
        }

        let distinct = self
            .views
            .iter()
            .map(RemoteViews::layout_id)
            .collect::<BTreeSet<_>>()
            .len();
        let view_type_count = match self.view_type_count {
            Some(count) if count < distinct => {
                return Err(ValidationError::InvalidCollection(format!(
                    "view type count {count} is smaller than the {distinct} distinct layouts"
                )));
            }
            Some(count) => count,
            None => distinct.max(1),
        };

        Ok(RemoteCollectionItems {
            ids: self.ids,
            views: self.views,
            has_stable_ids: self.has_stable_ids,
            view_type_count,
        })
    }
}
