//! Resolves legacy adapter intents into collection snapshots.
//!
//! Every distinct source in a hierarchy is fetched once from its remote
//! factory with an even share of what is left of the transaction budget.
//! The fetched snapshots replace the intents as cached collection actions.
//! A source that fails, times out or belongs to another package resolves to
//! an empty collection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::action::{Action, ActionKind, CollectionItemsAction, CollectionSource};
use crate::collection::RemoteCollectionItems;
use crate::config::CollectorConfig;
use crate::error::{CodecError, RemoteError};
use crate::intent::Intent;
use crate::remote_views::RemoteViews;

/// A bound remote factory that materializes a collection.
#[async_trait]
pub trait RemoteCollectionFactory: Send + Sync {
    /// Produces the items, keeping their serialized size near `byte_budget`
    /// and their bitmaps within `bitmap_budget` bytes.
    async fn get_remote_collection_items(
        &self,
        byte_budget: usize,
        bitmap_budget: usize,
    ) -> Result<RemoteCollectionItems, RemoteError>;
}

/// Binds the factory service an adapter intent addresses.
#[async_trait]
pub trait FactoryConnector: Send + Sync {
    async fn connect(&self, intent: &Intent) -> Result<Arc<dyn RemoteCollectionFactory>, RemoteError>;
}

/// Per-source share of what the transaction budget leaves over.
pub fn per_source_budget(total: usize, used: usize, sources: usize) -> usize {
    if sources == 0 {
        return 0;
    }
    total.saturating_sub(used) / sources
}

#[derive(Debug)]
struct Source {
    id: i32,
    uri: String,
    intent: Intent,
}

pub struct CollectionCollector {
    connector: Arc<dyn FactoryConnector>,
    package: String,
    config: CollectorConfig,
}

impl CollectionCollector {
    /// `package` is the package of the resolving context; sources must target it.
    pub fn new(connector: Arc<dyn FactoryConnector>, package: impl Into<String>, config: CollectorConfig) -> Self {
        Self {
            connector,
            package: package.into(),
            config,
        }
    }

    /// Replaces every legacy adapter intent in `tree` with the snapshot its
    /// factory produces and rebuilds the caches of `tree`.
    ///
    /// Only encoding `tree` to measure it can fail; remote failures resolve to
    /// empty collections.
    pub async fn collect_all_intents(&self, tree: &mut RemoteViews) -> Result<usize, CodecError> {
        let sources = self.sources(tree);
        if sources.is_empty() {
            return Ok(0);
        }

        let mut unresolved = tree.clone();
        unresolved.for_each_tree_mut(&mut |tree| {
            tree.actions_mut()
                .retain(|action| !matches!(action.kind(), ActionKind::LegacyAdapterIntent(_)));
        });
        let used = crate::codec::flat_size(&unresolved)?;
        let byte_budget = per_source_budget(self.config.transaction_budget, used, sources.len());
        let bitmap_budget = per_source_budget(
            self.config.max_bitmap_memory,
            tree.estimate_memory_usage(),
            sources.len(),
        );
        tracing::debug!(
            sources = sources.len(),
            used,
            byte_budget,
            bitmap_budget,
            "resolving legacy collection sources"
        );

        let mut resolved: Vec<Option<Arc<RemoteCollectionItems>>> = vec![None; sources.len()];
        let mut pending = JoinSet::new();
        for (index, source) in sources.iter().enumerate() {
            if let Err(err) = self.check_package(&source.intent) {
                tracing::warn!(uri = %source.uri, %err, "rejecting collection source");
                resolved[index] = Some(Arc::new(RemoteCollectionItems::empty()));
                continue;
            }
            let connector = self.connector.clone();
            let intent = source.intent.clone();
            let timeout = self.config.timeout();
            pending.spawn(async move {
                let fetch = async {
                    let factory = connector.connect(&intent).await?;
                    factory.get_remote_collection_items(byte_budget, bitmap_budget).await
                };
                let result = match tokio::time::timeout(timeout, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout(timeout)),
                };
                (index, result)
            });
        }

        while let Some(joined) = pending.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    tracing::warn!(%err, "collection source task failed");
                    continue;
                }
            };
            let items = result.unwrap_or_else(|err| {
                tracing::warn!(uri = %sources[index].uri, %err, "collection source resolved empty");
                RemoteCollectionItems::empty()
            });
            resolved[index] = Some(Arc::new(items));
        }

        let empty = Arc::new(RemoteCollectionItems::empty());
        let resolved: Vec<Arc<RemoteCollectionItems>> = resolved
            .into_iter()
            .map(|items| items.unwrap_or_else(|| empty.clone()))
            .collect();

        tree.for_each_tree_mut(&mut |tree| {
            for action in tree.actions_mut() {
                let ActionKind::LegacyAdapterIntent(legacy) = action.kind() else {
                    continue;
                };
                let uri = legacy.intent.to_uri();
                let Some(index) = sources.iter().position(|source| source.uri == uri) else {
                    continue;
                };
                *action = Action::new(
                    action.view_id(),
                    ActionKind::CollectionItems(CollectionItemsAction {
                        source: CollectionSource::Cached {
                            intent_id: sources[index].id,
                            uri,
                            items: resolved[index].clone(),
                        },
                    }),
                );
            }
        });
        tree.reconstruct_caches();
        Ok(sources.len())
    }

    /// Distinct legacy sources of `tree` in first-seen order, with fresh ids.
    fn sources(&self, tree: &RemoteViews) -> Vec<Source> {
        let first_id = tree
            .caches()
            .with(|set| set.collections.entries().map(|(id, _, _)| id + 1).max())
            .flatten()
            .unwrap_or(0);

        let mut sources: Vec<Source> = Vec::new();
        tree.for_each_tree(&mut |tree| {
            for action in tree.actions() {
                if let ActionKind::LegacyAdapterIntent(legacy) = action.kind() {
                    let uri = legacy.intent.to_uri();
                    if sources.iter().all(|source| source.uri != uri) {
                        let id = first_id + sources.len() as i32;
                        sources.push(Source {
                            id,
                            uri,
                            intent: legacy.intent.clone(),
                        });
                    }
                }
            }
        });
        sources
    }

    fn check_package(&self, intent: &Intent) -> Result<(), RemoteError> {
        match &intent.component {
            Some(component) if component.package == self.package => Ok(()),
            other => Err(RemoteError::ForeignPackage {
                component: other
                    .as_ref()
                    .map_or_else(|| "<none>".to_string(), |c| format!("{}/{}", c.package, c.class)),
                package: self.package.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::time::Duration;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::intent::ComponentName;
    use crate::test_support::{PACKAGE, ids, item};

    #[derive(Clone, Copy)]
    enum Behavior {
        Answer,
        Fail,
        Hang,
    }

    struct Factory {
        uri: String,
        behavior: Behavior,
        calls: Arc<Mutex<Vec<(String, usize, usize)>>>,
    }

    #[async_trait]
    impl RemoteCollectionFactory for Factory {
        async fn get_remote_collection_items(
            &self,
            byte_budget: usize,
            bitmap_budget: usize,
        ) -> Result<RemoteCollectionItems, RemoteError> {
            self.calls.lock().push((self.uri.clone(), byte_budget, bitmap_budget));
            match self.behavior {
                Behavior::Answer => RemoteCollectionItems::builder()
                    .add_item(1, item("first"))
                    .add_item(2, item("second"))
                    .build()
                    .map_err(|err| RemoteError::Factory(err.to_string())),
                Behavior::Fail => Err(RemoteError::Factory("boom".to_string())),
                Behavior::Hang => future::pending().await,
            }
        }
    }

    struct Connector {
        behavior: Behavior,
        calls: Arc<Mutex<Vec<(String, usize, usize)>>>,
    }

    impl Connector {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Arc::default(),
            })
        }

        fn calls(&self) -> Vec<(String, usize, usize)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl FactoryConnector for Connector {
        async fn connect(&self, intent: &Intent) -> Result<Arc<dyn RemoteCollectionFactory>, RemoteError> {
            Ok(Arc::new(Factory {
                uri: intent.to_uri(),
                behavior: self.behavior,
                calls: self.calls.clone(),
            }))
        }
    }

    fn source(class: &str) -> Intent {
        Intent::for_component(ComponentName::new(PACKAGE, class))
    }

    fn collector(connector: Arc<Connector>) -> CollectionCollector {
        CollectionCollector::new(connector, PACKAGE, CollectorConfig::default())
    }

    fn cached_items(tree: &RemoteViews, index: usize) -> (i32, Arc<RemoteCollectionItems>) {
        match tree.actions()[index].kind() {
            ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Cached { intent_id, items, .. },
            }) => (*intent_id, items.clone()),
            other => panic!("expected cached collection, got {other:?}"),
        }
    }

    #[rstest]
    #[case(800_000, 700_000, 2, 50_000)]
    #[case(800_000, 900_000, 2, 0)]
    #[case(800_000, 800_000, 3, 0)]
    #[case(800_000, 0, 0, 0)]
    fn budget_is_shared_evenly(
        #[case] total: usize,
        #[case] used: usize,
        #[case] sources: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(per_source_budget(total, used, sources), expected);
    }

    #[tokio::test]
    async fn duplicate_sources_resolve_once_and_share_items() {
        let connector = Connector::new(Behavior::Answer);
        let mut nested = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        nested.set_remote_adapter(ids::LIST, source("ListService")).expect("nested");
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_remote_adapter(ids::LIST, source("ListService"))
            .expect("legacy")
            .set_text_view_text(ids::TITLE, "title")
            .expect("title")
            .add_view(ids::CONTAINER, nested)
            .expect("nested");

        let resolved = collector(connector.clone())
            .collect_all_intents(&mut tree)
            .await
            .expect("collect");
        assert_eq!(resolved, 1);
        assert_eq!(connector.calls().len(), 1);

        let (id, items) = cached_items(&tree, 0);
        assert_eq!(id, 0);
        assert_eq!(items.item_count(), 2);
        let nested_items = match tree.actions()[2].kind() {
            ActionKind::AddView(add) => cached_items(&add.nested, 0).1,
            other => panic!("expected nested tree, got {other:?}"),
        };
        assert!(Arc::ptr_eq(&items, &nested_items));
        assert_eq!(tree.caches().with(|set| set.collections.len()), Some(1));
        assert!(items.item_view(0).expect("item").caches().same_as(tree.caches()));
    }

    #[tokio::test]
    async fn budgets_split_what_the_tree_leaves() {
        let connector = Connector::new(Behavior::Answer);
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_remote_adapter(ids::LIST, source("First"))
            .expect("first")
            .set_remote_adapter(ids::FLIPPER, source("Second"))
            .expect("second")
            .set_text_view_text(ids::TITLE, "title")
            .expect("title");

        let mut without = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        without.set_text_view_text(ids::TITLE, "title").expect("title");
        let used = crate::codec::flat_size(&without).expect("size");

        collector(connector.clone())
            .collect_all_intents(&mut tree)
            .await
            .expect("collect");

        let config = CollectorConfig::default();
        let mut calls = connector.calls();
        calls.sort();
        assert_eq!(calls.len(), 2);
        for (_, bytes, bitmaps) in calls {
            assert_eq!(bytes, (config.transaction_budget - used) / 2);
            assert_eq!(bitmaps, config.max_bitmap_memory / 2);
        }
        assert_eq!(cached_items(&tree, 0).0, 0);
        assert_eq!(cached_items(&tree, 1).0, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_factory_times_out_to_empty_items() {
        let connector = Connector::new(Behavior::Hang);
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_remote_adapter(ids::LIST, source("Slow")).expect("legacy");

        let started = tokio::time::Instant::now();
        collector(connector)
            .collect_all_intents(&mut tree)
            .await
            .expect("collect completes");

        assert!(started.elapsed() >= Duration::from_millis(20_000));
        let (_, items) = cached_items(&tree, 0);
        assert_eq!(*items, RemoteCollectionItems::empty());
    }

    #[tokio::test]
    async fn failures_and_foreign_packages_resolve_empty() {
        let failing = Connector::new(Behavior::Fail);
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_remote_adapter(ids::LIST, source("Broken")).expect("legacy");
        collector(failing)
            .collect_all_intents(&mut tree)
            .await
            .expect("collect");
        assert!(cached_items(&tree, 0).1.is_empty());

        let answering = Connector::new(Behavior::Answer);
        let mut foreign = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        foreign
            .set_remote_adapter(
                ids::LIST,
                Intent::for_component(ComponentName::new("com.other", "Service")),
            )
            .expect("legacy");
        collector(answering.clone())
            .collect_all_intents(&mut foreign)
            .await
            .expect("collect");
        assert!(answering.calls().is_empty());
        assert!(cached_items(&foreign, 0).1.is_empty());
    }

    #[tokio::test]
    async fn trees_without_legacy_sources_are_untouched() {
        let connector = Connector::new(Behavior::Answer);
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_text_view_text(ids::TITLE, "title").expect("title");
        let before = tree.clone();

        let resolved = collector(connector.clone())
            .collect_all_intents(&mut tree)
            .await
            .expect("collect");
        assert_eq!(resolved, 0);
        assert_eq!(tree, before);
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn resolved_tree_survives_the_flat_form() {
        let connector = Connector::new(Behavior::Answer);
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_remote_adapter(ids::LIST, source("ListService")).expect("legacy");
        collector(connector)
            .collect_all_intents(&mut tree)
            .await
            .expect("collect");

        let bytes = crate::codec::encode_flat(&tree).expect("encode");
        let decoded = crate::codec::decode_flat(&bytes, Default::default()).expect("decode");
        assert_eq!(decoded, tree);
    }
}
