//! Wire forms of a description tree.
//!
//! Both forms carry the tree together with its hierarchy's caches: bitmaps
//! once each, and every cached collection snapshot once per source URI.
//!
//! The structured form is self-describing JSON. Resource ids in its body are
//! the producer's own numbers; a name table maps each of them to a resource
//! name, and the consumer resolves the names against its own resources. The
//! flat form is postcard with raw ids and is only meaningful between
//! processes built from the same resources.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, CollectionItemsAction, CollectionSource};
use crate::bitmap::{Bitmap, BitmapCache};
use crate::cache::{CacheHandle, CacheSet};
use crate::collection::RemoteCollectionItems;
use crate::error::{CodecError, ValidationError};
use crate::remote_views::{DecodeScope, RemoteViews};
use crate::resources::ResourceResolver;

const FORMAT_VERSION: u32 = 1;

/// Which wire form a payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireForm {
    #[default]
    Structured,
    Flat,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Skips the nesting guard for callers with system privileges.
    pub trusted_system_caller: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireCaches {
    bitmaps: Vec<Bitmap>,
    collection_uris: BTreeMap<i32, String>,
    collection_items: BTreeMap<String, Arc<RemoteCollectionItems>>,
}

#[derive(Serialize, Deserialize)]
struct StructuredDocument {
    version: u32,
    names: BTreeMap<i32, String>,
    caches: WireCaches,
    tree: RemoteViews,
}

#[derive(Serialize, Deserialize)]
struct FlatDocument {
    version: u32,
    caches: WireCaches,
    tree: RemoteViews,
}

/// Encodes `tree` in the structured form, naming every resource id through
/// `resolver`.
pub fn encode_structured(tree: &RemoteViews, resolver: &dyn ResourceResolver) -> Result<Vec<u8>, CodecError> {
    let (mut tree, mut caches) = snapshot(tree);

    let mut names = BTreeMap::new();
    let mut name = |id: i32| -> Result<i32, ValidationError> {
        if !names.contains_key(&id) {
            let resolved = resolver.name_of(id).ok_or(ValidationError::UnnamedResource(id))?;
            names.insert(id, resolved);
        }
        Ok(id)
    };
    remap_all(&mut tree, &mut caches, &mut name)?;

    let document = StructuredDocument {
        version: FORMAT_VERSION,
        names,
        caches,
        tree,
    };
    let bytes = serde_json::to_vec(&document)?;
    tracing::trace!(bytes = bytes.len(), names = document.names.len(), "encoded structured tree");
    Ok(bytes)
}

/// Decodes the structured form, mapping resource names onto `resolver`'s ids.
pub fn decode_structured(
    bytes: &[u8],
    resolver: &dyn ResourceResolver,
    options: DecodeOptions,
) -> Result<RemoteViews, CodecError> {
    let scope = DecodeScope::enter(options.trusted_system_caller);
    let StructuredDocument {
        names,
        mut caches,
        mut tree,
        ..
    } = serde_json::from_slice(bytes).map_err(|err| decode_failure(&scope, err))?;

    let mut resolve = |id: i32| -> Result<i32, ValidationError> {
        let name = names.get(&id).ok_or(ValidationError::UnnamedResource(id))?;
        resolver
            .id_of(name)
            .ok_or_else(|| ValidationError::UnresolvableName(name.clone()))
    };
    remap_all(&mut tree, &mut caches, &mut resolve)?;
    Ok(rebuild(tree, caches)?)
}

/// Encodes `tree` in the flat, same-build form.
pub fn encode_flat(tree: &RemoteViews) -> Result<Vec<u8>, CodecError> {
    let (tree, caches) = snapshot(tree);
    let bytes = postcard::to_allocvec(&FlatDocument {
        version: FORMAT_VERSION,
        caches,
        tree,
    })?;
    tracing::trace!(bytes = bytes.len(), "encoded flat tree");
    Ok(bytes)
}

pub fn decode_flat(bytes: &[u8], options: DecodeOptions) -> Result<RemoteViews, CodecError> {
    let scope = DecodeScope::enter(options.trusted_system_caller);
    let FlatDocument { caches, tree, .. } =
        postcard::from_bytes(bytes).map_err(|err| decode_failure(&scope, err))?;
    Ok(rebuild(tree, caches)?)
}

/// Size of the flat encoding of `tree`, caches included.
pub fn flat_size(tree: &RemoteViews) -> Result<usize, CodecError> {
    encode_flat(tree).map(|bytes| bytes.len())
}

pub fn encode(tree: &RemoteViews, form: WireForm, resolver: &dyn ResourceResolver) -> Result<Vec<u8>, CodecError> {
    match form {
        WireForm::Structured => encode_structured(tree, resolver),
        WireForm::Flat => encode_flat(tree),
    }
}

pub fn decode(
    bytes: &[u8],
    form: WireForm,
    resolver: &dyn ResourceResolver,
    options: DecodeOptions,
) -> Result<RemoteViews, CodecError> {
    match form {
        WireForm::Structured => decode_structured(bytes, resolver, options),
        WireForm::Flat => decode_flat(bytes, options),
    }
}

/// A root copy of `tree` and the caches it refers to.
fn snapshot(tree: &RemoteViews) -> (RemoteViews, WireCaches) {
    let root = if tree.is_root() {
        tree.clone()
    } else {
        tree.deep_copy()
    };
    let caches = root
        .caches()
        .with(|set| {
            let mut caches = WireCaches {
                bitmaps: set.bitmaps.bitmaps().to_vec(),
                ..WireCaches::default()
            };
            for (id, uri, items) in set.collections.entries() {
                caches.collection_uris.insert(id, uri.to_string());
                caches
                    .collection_items
                    .entry(uri.to_string())
                    .or_insert_with(|| items.clone());
            }
            caches
        })
        .unwrap_or_default();
    (root, caches)
}

fn remap_all(
    tree: &mut RemoteViews,
    caches: &mut WireCaches,
    map: &mut dyn FnMut(i32) -> Result<i32, ValidationError>,
) -> Result<(), ValidationError> {
    tree.try_for_each_tree_mut(&mut |tree| tree.remap_own_ids(map))?;
    for items in caches.collection_items.values_mut() {
        if items.is_empty() {
            continue;
        }
        for view in Arc::make_mut(items).views_mut() {
            view.try_for_each_tree_mut(&mut |tree| tree.remap_own_ids(map))?;
        }
    }
    Ok(())
}

/// Reports a nesting violation in place of the parse error it caused.
fn decode_failure(scope: &DecodeScope, err: impl Into<CodecError>) -> CodecError {
    scope
        .violation()
        .map_or_else(|| err.into(), CodecError::Validation)
}

/// Turns a decoded tree and its wire caches back into a root with shared caches.
fn rebuild(mut tree: RemoteViews, caches: WireCaches) -> Result<RemoteViews, ValidationError> {
    let WireCaches {
        bitmaps,
        collection_uris,
        mut collection_items,
    } = caches;

    // Bitmaps first: attaching a tree registers its bitmaps with the cache,
    // which must find the decoded ones rather than placeholders.
    fill_bitmaps(&mut tree, &bitmaps)?;
    for items in collection_items.values_mut() {
        if items.is_empty() {
            continue;
        }
        for view in Arc::make_mut(items).views_mut() {
            fill_bitmaps(view, &bitmaps)?;
        }
    }

    let handle = CacheHandle::from_set(CacheSet {
        bitmaps: BitmapCache::from_bitmaps(bitmaps),
        ..CacheSet::default()
    });
    for items in collection_items.values_mut() {
        if !items.is_empty() {
            Arc::make_mut(items).set_hierarchy_root(&handle);
        }
    }

    let mut registered = Vec::with_capacity(collection_uris.len());
    for (id, uri) in collection_uris {
        let items = collection_items
            .get(&uri)
            .cloned()
            .ok_or(ValidationError::UnknownCollection(id))?;
        registered.push((id, uri, items));
    }
    handle.with(|set| {
        for (id, uri, items) in registered {
            set.collections.add_mapping(id, &uri, items);
        }
    });

    let lookup = handle.clone();
    tree.try_for_each_tree_mut(&mut |tree| {
        for action in tree.actions_mut() {
            if let ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Cached { intent_id, items, .. },
            }) = action.kind_mut()
            {
                *items = lookup
                    .with(|set| set.collections.items_for_id(*intent_id))
                    .flatten()
                    .ok_or(ValidationError::UnknownCollection(*intent_id))?;
            }
        }
        Ok(())
    })?;

    tree.adopt_caches(handle);
    Ok(tree)
}

fn fill_bitmaps(tree: &mut RemoteViews, bitmaps: &[Bitmap]) -> Result<(), ValidationError> {
    tree.try_for_each_tree_mut(&mut |tree| {
        for action in tree.actions_mut() {
            if let ActionKind::BitmapReflection(a) = action.kind_mut() {
                a.bitmap = bitmaps
                    .get(a.bitmap_id)
                    .cloned()
                    .ok_or(ValidationError::UnknownBitmap(a.bitmap_id))?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::action::Action;
    use crate::engine::ApplyParams;
    use crate::remote_views::{MAX_DECODE_DEPTH, MAX_NESTED_VIEWS};
    use crate::intent::Intent;
    use crate::resources::{Orientation, ResourceTable, SizeF};
    use crate::test_support::{PACKAGE, engine, ids, item, resources};
    use crate::view::ViewTree;

    fn bitmap(value: u8) -> Bitmap {
        Bitmap::new(2, 2, vec![value; 16])
    }

    fn card() -> RemoteViews {
        let mut nested = RemoteViews::new(PACKAGE, ids::ITEM_LAYOUT);
        nested
            .set_text_view_text(ids::ITEM_TEXT, "nested")
            .expect("text")
            .set_image_view_bitmap(ids::ITEM_ROOT, bitmap(3))
            .expect("bitmap");

        let mut card = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        card.set_text_view_text(ids::TITLE, "title")
            .expect("title")
            .set_image_view_bitmap(ids::ICON, bitmap(3))
            .expect("icon")
            .set_color(ids::TITLE, "setTextColor", ids::ACCENT_COLOR)
            .expect("color")
            .add_stable_view(ids::CONTAINER, nested, 7)
            .expect("nested");
        card
    }

    #[test]
    fn structured_round_trip_preserves_tree_and_shares_bitmaps() {
        let tree = card();
        let table = resources();
        let bytes = encode_structured(&tree, &table).expect("encode");
        let decoded = decode_structured(&bytes, &table, DecodeOptions::default()).expect("decode");

        assert_eq!(decoded, tree);
        assert!(decoded.is_root());
        assert_eq!(decoded.caches().with(|set| set.bitmaps.len()), Some(1));

        let mut shared = 0;
        decoded.for_each_tree(&mut |tree| {
            if tree.caches().same_as(decoded.caches()) {
                shared += 1;
            }
        });
        assert_eq!(shared, 2);
    }

    #[test]
    fn flat_round_trip_preserves_variants() {
        let mut small = RemoteViews::new(PACKAGE, ids::ITEM_LAYOUT);
        small.set_text_view_text(ids::ITEM_TEXT, "small").expect("text");
        let tree = RemoteViews::from_sizes(vec![(SizeF::new(300.0, 200.0), card()), (SizeF::new(100.0, 100.0), small)])
            .expect("sizes");

        let bytes = encode_flat(&tree).expect("encode");
        let decoded = decode_flat(&bytes, DecodeOptions::default()).expect("decode");
        assert_eq!(decoded, tree);
        assert_eq!(
            decoded
                .select_variant(Orientation::Portrait, Some(SizeF::new(320.0, 240.0)))
                .layout_id(),
            ids::CARD_LAYOUT
        );
        assert_eq!(flat_size(&tree).expect("size"), bytes.len());
    }

    #[test]
    fn decoded_tree_applies_like_the_original() {
        let engine = engine();
        let tree = card();
        let decoded = decode_structured(
            &encode_structured(&tree, &resources()).expect("encode"),
            &resources(),
            DecodeOptions::default(),
        )
        .expect("decode");

        let mut direct = ViewTree::new();
        let direct_root = engine.apply(&mut direct, &tree, &ApplyParams::default()).expect("apply original");
        let mut replayed = ViewTree::new();
        let replayed_root = engine
            .apply(&mut replayed, &decoded, &ApplyParams::default())
            .expect("apply decoded");

        assert_eq!(direct.view_ids(direct_root), replayed.view_ids(replayed_root));
    }

    #[test]
    fn consumer_ids_replace_producer_ids() {
        let producer = resources();
        let mut consumer = ResourceTable::new();
        consumer
            .define(0x7f0b_1001, "layout/card")
            .define(0x7f0b_1002, "layout/item")
            .define(0x7f08_1002, "id/title")
            .define(0x7f08_1003, "id/icon")
            .define(0x7f08_1004, "id/container")
            .define(0x7f08_1010, "id/item_root")
            .define(0x7f08_1011, "id/item_text")
            .define(0x7f06_1001, "color/accent");

        let bytes = encode_structured(&card(), &producer).expect("encode");
        let decoded = decode_structured(&bytes, &consumer, DecodeOptions::default()).expect("decode");

        assert_eq!(decoded.layout_id(), 0x7f0b_1001);
        let targets: Vec<i32> = decoded.actions().iter().map(Action::view_id).collect();
        assert_eq!(targets, vec![0x7f08_1002, 0x7f08_1003, 0x7f08_1002, 0x7f08_1004]);
        match decoded.actions()[3].kind() {
            ActionKind::AddView(add) => assert_eq!(add.nested.layout_id(), 0x7f0b_1002),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn unknown_names_fail_decoding() {
        let bytes = encode_structured(&card(), &resources()).expect("encode");
        let mut partial = ResourceTable::new();
        partial.define(0x7f0b_1001, "layout/card");

        let err = decode_structured(&bytes, &partial, DecodeOptions::default()).expect_err("missing names");
        assert!(
            matches!(err, CodecError::Validation(ValidationError::UnresolvableName(_))),
            "{err}"
        );
    }

    #[test]
    fn unnamed_ids_fail_encoding() {
        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.set_text_view_text(0x0100_0001, "anonymous").expect("text");
        let err = encode_structured(&tree, &resources()).expect_err("unnamed view id");
        assert!(
            matches!(
                err,
                CodecError::Validation(ValidationError::UnnamedResource(0x0100_0001))
            ),
            "{err}"
        );
    }

    #[test]
    fn cached_collections_are_restored_from_the_cache_table() {
        let items = RemoteCollectionItems::builder()
            .add_item(1, item("one"))
            .add_item(2, item("two"))
            .build()
            .expect("items");
        let uri = Intent::new("com.example.LIST").to_uri();

        let mut tree = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        tree.add_action(Action::new(
            ids::LIST,
            ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Cached {
                    intent_id: 0,
                    uri: uri.clone(),
                    items: Arc::new(items),
                },
            }),
        ))
        .expect("cached items");

        let decoded = decode_flat(&encode_flat(&tree).expect("encode"), DecodeOptions::default()).expect("decode");
        assert_eq!(decoded, tree);
        let cached = decoded
            .caches()
            .with(|set| set.collections.items_for_id(0))
            .flatten()
            .expect("cached snapshot");
        assert_eq!(cached.item_count(), 2);
        assert!(cached
            .item_view(0)
            .expect("item")
            .caches()
            .same_as(decoded.caches()));
        assert_eq!(decoded.caches().with(|set| set.collections.uri_for_id(0).map(str::to_string)).flatten(), Some(uri));
    }

    fn chain(levels: usize) -> RemoteViews {
        let mut chain = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        for _ in 0..levels {
            let mut parent = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
            parent.add_view(ids::CONTAINER, chain).expect("within limit");
            chain = parent;
        }
        chain
    }

    /// A structured payload nesting one more level than the builder allows.
    fn eleven_levels() -> Vec<u8> {
        let table = resources();
        let bytes = encode_structured(&chain(MAX_NESTED_VIEWS), &table).expect("encode");
        let mut document: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

        let mut wrapper = RemoteViews::new(PACKAGE, ids::CARD_LAYOUT);
        wrapper
            .add_view(ids::CONTAINER, RemoteViews::new(PACKAGE, ids::CARD_LAYOUT))
            .expect("wrapper");
        let mut outer = serde_json::to_value(&wrapper).expect("wrapper json");
        outer["body"]["Layout"]["actions"][0][2]["nested"] = document["tree"].take();
        document["tree"] = outer;
        serde_json::to_vec(&document).expect("bytes")
    }

    #[test]
    fn ten_levels_decode() {
        let table = resources();
        let bytes = encode_structured(&chain(MAX_NESTED_VIEWS), &table).expect("encode");
        let decoded = decode_structured(&bytes, &table, DecodeOptions::default()).expect("decode");
        assert_eq!(decoded.nesting_depth(), MAX_NESTED_VIEWS);
    }

    #[test]
    fn eleven_levels_need_a_trusted_caller() {
        let table = resources();
        let bytes = eleven_levels();

        let err = decode_structured(&bytes, &table, DecodeOptions::default()).expect_err("too deep");
        assert!(
            matches!(
                err,
                CodecError::Validation(ValidationError::TooManyNestedViews { depth: 11, max: 10 })
            ),
            "{err}"
        );

        let trusted = decode_structured(
            &bytes,
            &table,
            DecodeOptions {
                trusted_system_caller: true,
            },
        )
        .expect("system caller");
        assert_eq!(trusted.nesting_depth(), 11);
    }

    /// A flat payload nesting `levels` subtree additions, spliced together
    /// from the encodings of a leaf and of one wrapper around it.
    fn flat_chain(levels: usize) -> Vec<u8> {
        let leaf = encode_flat(&chain(0)).expect("leaf");
        let wrapped = encode_flat(&chain(1)).expect("wrapper");
        let header = postcard::to_allocvec(&(FORMAT_VERSION, WireCaches::default())).expect("header");
        let body = &leaf[header.len()..];
        let at = wrapped[header.len()..]
            .windows(body.len())
            .position(|window| window == body)
            .expect("leaf inside wrapper")
            + header.len();
        let (open, close) = (&wrapped[header.len()..at], &wrapped[at + body.len()..]);

        let mut bytes = header;
        bytes.extend(open.repeat(levels));
        bytes.extend_from_slice(body);
        bytes.extend(close.repeat(levels));
        bytes
    }

    #[test]
    fn flat_chain_matches_the_builder() {
        let bytes = flat_chain(3);
        assert_eq!(bytes, encode_flat(&chain(3)).expect("encode"));
    }

    #[test]
    fn hostile_nesting_fails_without_exhausting_the_stack() {
        let bytes = flat_chain(20_000);
        let outcome = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let untrusted = decode_flat(&bytes, DecodeOptions::default()).map(|_| ());
                let trusted = decode_flat(
                    &bytes,
                    DecodeOptions {
                        trusted_system_caller: true,
                    },
                )
                .map(|_| ());
                (untrusted, trusted)
            })
            .expect("spawn")
            .join()
            .expect("decoder thread survives");

        assert!(
            matches!(
                outcome.0,
                Err(CodecError::Validation(ValidationError::TooManyNestedViews { depth: 11, max: 10 }))
            ),
            "{:?}",
            outcome.0
        );
        assert!(
            matches!(
                outcome.1,
                Err(CodecError::Validation(ValidationError::TooManyNestedViews { max: MAX_DECODE_DEPTH, .. }))
            ),
            "{:?}",
            outcome.1
        );
    }

    #[test]
    fn failed_decode_leaves_the_thread_ready_for_the_next_one() {
        let _ = decode_flat(&flat_chain(MAX_NESTED_VIEWS + 1), DecodeOptions::default()).expect_err("too deep");
        let decoded = decode_flat(&flat_chain(MAX_NESTED_VIEWS), DecodeOptions::default()).expect("decode");
        assert_eq!(decoded.nesting_depth(), MAX_NESTED_VIEWS);
    }

    #[test]
    fn unknown_bitmap_ids_are_rejected() {
        let table = resources();
        let bytes = encode_structured(&card(), &table).expect("encode");
        let mut document: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        document["caches"]["bitmaps"] = serde_json::json!([]);
        let bytes = serde_json::to_vec(&document).expect("bytes");

        let err = decode_structured(&bytes, &table, DecodeOptions::default()).expect_err("bitmap missing");
        assert!(
            matches!(err, CodecError::Validation(ValidationError::UnknownBitmap(0))),
            "{err}"
        );
    }
}
