use std::sync::Arc;
use std::thread;

use crate::types::nbt::{BinaryTag, Compound};

use super::store::{TagReadable, TagStore};
use super::tag::Tag;

#[test]
fn set_get_root_tag() {
    // Goal: A root-level write is readable and serializes under its key
    let tag = Tag::int("k");
    let store = TagStore::new();
    store.set_tag(&tag, 7);

    assert_eq!(store.get_tag(&tag), Some(7));
    let expected = Compound::builder().put("k", BinaryTag::Int(7)).build();
    assert_eq!(store.as_compound(), expected);
}

#[test]
fn path_tag_serializes_nested() {
    // Goal: A path tag lands in a nested compound
    let tag = Tag::int("k").with_path(&["p"]);
    let store = TagStore::new();
    store.set_tag(&tag, 5);

    assert_eq!(store.get_tag(&tag), Some(5));
    let expected = Compound::builder()
        .put("p", BinaryTag::Compound(Compound::builder().put("k", BinaryTag::Int(5)).build()))
        .build();
    assert_eq!(store.as_compound(), expected);
}

#[test]
fn deep_path_round_trip() {
    // Goal: Tags several path segments deep still round-trip
    let tag = Tag::string("key").with_path(&["key0", "key1", "key2", "key3"]);
    let store = TagStore::new();
    store.set_tag(&tag, "value".to_string());
    assert_eq!(store.get_tag(&tag), Some("value".to_string()));
}

#[test]
fn absent_tag_yields_default() {
    // Goal: A miss returns None without a default, and the default with one
    let store = TagStore::new();
    assert_eq!(store.get_tag(&Tag::int("missing")), None);

    let defaulted = Tag::int("missing").default_value(|| 12);
    assert_eq!(store.get_tag(&defaulted), Some(12));
}

#[test]
fn mismatched_tag_shape_reads_nothing() {
    // Goal: A tag of a different shape at the same key sees no value
    let store = TagStore::new();
    store.set_tag(&Tag::int("entry"), 1);
    assert_eq!(store.get_tag(&Tag::string("entry")), None);
}

#[test]
fn shared_index_across_tag_instances() {
    // Goal: Separately constructed tags with the same key and shape share
    // the stored value
    let store = TagStore::new();
    store.set_tag(&Tag::long("shared"), 99);
    assert_eq!(store.get_tag(&Tag::long("shared")), Some(99));
}

#[test]
fn compound_round_trip_through_serialized_form() {
    // Goal: Rebuilding a store from its compound preserves typed reads
    let tag = Tag::string("component");
    let store = TagStore::new();
    store.set_tag(&tag, "hey".to_string());

    let rebuilt = TagStore::from_compound(&store.as_compound());
    assert_eq!(rebuilt.get_tag(&tag), Some("hey".to_string()));
    assert_eq!(rebuilt.as_compound(), store.as_compound());
}

#[test]
fn nested_compound_round_trip() {
    // Goal: from_compound reconstructs nested subtrees addressable by path
    let inner = Tag::double("d").with_path(&["outer", "inner"]);
    let store = TagStore::new();
    store.set_tag(&inner, 2.5);
    store.set_tag(&Tag::byte("b"), 3);

    let rebuilt = TagStore::from_compound(&store.as_compound());
    assert_eq!(rebuilt.get_tag(&inner), Some(2.5));
    assert_eq!(rebuilt.get_tag(&Tag::byte("b")), Some(3));
    assert_eq!(rebuilt.as_compound(), store.as_compound());
}

#[test]
fn raw_nbt_list_round_trip() {
    // Goal: Lists ride through raw tags and survive serialization
    let tag = Tag::nbt("items");
    let list = BinaryTag::List(vec![BinaryTag::Int(1), BinaryTag::Int(2)]);
    let store = TagStore::new();
    store.set_tag(&tag, list.clone());

    assert_eq!(store.get_tag(&tag), Some(list.clone()));
    let rebuilt = TagStore::from_compound(&store.as_compound());
    assert_eq!(rebuilt.get_tag(&tag), Some(list));
}

#[test]
fn raw_compound_write_installs_subtree() {
    // Goal: Writing a compound through a raw tag stores it as a live
    // subtree and serializes it back under the raw tag's key
    let store = TagStore::new();
    let child = Compound::builder().put("k", BinaryTag::Int(4)).build();
    store.set_tag(&Tag::nbt("sub"), BinaryTag::Compound(child.clone()));

    assert_eq!(store.get_tag(&Tag::nbt("sub")), Some(BinaryTag::Compound(child.clone())));
    let expected = Compound::builder().put("sub", BinaryTag::Compound(child)).build();
    assert_eq!(store.as_compound(), expected);
}

#[test]
fn structure_tag_round_trip() {
    // Goal: Structure tags serialize as compounds and read back through
    // both their own serializer and typed path tags
    #[derive(Clone, PartialEq, Debug)]
    struct Holder {
        a: i32,
    }
    let structure = Tag::structure(
        "s",
        |h: &Holder| Compound::builder().put("a", BinaryTag::Int(h.a)).build(),
        |c| match c.get("a") {
            Some(BinaryTag::Int(a)) => Some(Holder { a: *a }),
            _ => None,
        },
    );

    let store = TagStore::new();
    store.set_tag(&structure, Holder { a: 9 });
    assert_eq!(store.get_tag(&structure), Some(Holder { a: 9 }));
    assert_eq!(store.get_tag(&Tag::int("a").with_path(&["s"])), Some(9));
}

#[test]
fn structure_leaf_displaced_by_path_write() {
    // Goal: A structure leaf in the way of a path write is displaced by a
    // child node seeded from its serialized form
    #[derive(Clone, PartialEq, Debug)]
    struct Holder {
        a: i32,
    }
    let structure = Tag::structure(
        "s",
        |h: &Holder| Compound::builder().put("a", BinaryTag::Int(h.a)).build(),
        |c| match c.get("a") {
            Some(BinaryTag::Int(a)) => Some(Holder { a: *a }),
            _ => None,
        },
    );

    let store = TagStore::new();
    store.set_tag(&structure, Holder { a: 9 });
    store.set_tag(&Tag::int("b").with_path(&["s"]), 1);

    assert_eq!(store.get_tag(&Tag::int("a").with_path(&["s"])), Some(9));
    assert_eq!(store.get_tag(&Tag::int("b").with_path(&["s"])), Some(1));
    assert_eq!(store.get_tag(&structure), Some(Holder { a: 9 }));
}

#[test]
fn view_tag_replaces_whole_subtree() {
    // Goal: A view write replaces the subtree content; a view read sees it
    let view = Tag::view("v");
    let store = TagStore::new();
    store.set_tag(&Tag::int("old").with_path(&["v"]), 1);

    let content = Compound::builder().put("new", BinaryTag::Int(2)).build();
    store.set_tag(&view, content.clone());

    assert_eq!(store.get_tag(&view), Some(content.clone()));
    assert_eq!(store.get_tag(&Tag::int("old").with_path(&["v"])), None);
    let expected = Compound::builder().put("v", BinaryTag::Compound(content)).build();
    assert_eq!(store.as_compound(), expected);
}

#[test]
fn view_serializer_round_trip() {
    // Goal: Serializer-backed views map a typed value over a subtree
    #[derive(Clone, PartialEq, Debug)]
    struct Pos {
        x: i32,
        y: i32,
    }
    let view = Tag::view_with(
        "pos",
        |p: &Pos| {
            Compound::builder()
                .put("x", BinaryTag::Int(p.x))
                .put("y", BinaryTag::Int(p.y))
                .build()
        },
        |c| {
            match (c.get("x"), c.get("y")) {
                (Some(BinaryTag::Int(x)), Some(BinaryTag::Int(y))) => Some(Pos { x: *x, y: *y }),
                _ => None,
            }
        },
    );

    let store = TagStore::new();
    store.set_tag(&view, Pos { x: 3, y: -4 });
    assert_eq!(store.get_tag(&view), Some(Pos { x: 3, y: -4 }));
    assert_eq!(store.get_tag(&Tag::int("x").with_path(&["pos"])), Some(3));
}

#[test]
fn update_family() {
    // Goal: The read-modify-write variants report the right before/after
    // values and removal via None works
    let tag = Tag::int("counter");
    let store = TagStore::new();

    assert_eq!(store.get_and_set_tag(&tag, 1), None);
    assert_eq!(store.get_and_set_tag(&tag, 2), Some(1));

    assert_eq!(store.update_and_get_tag(&tag, |v| v.map(|n| n + 1)), Some(3));
    assert_eq!(store.get_and_update_tag(&tag, |v| v.map(|n| n * 10)), Some(3));
    assert_eq!(store.get_tag(&tag), Some(30));

    store.update_tag(&tag, |_| None);
    assert_eq!(store.get_tag(&tag), None);
}

#[test]
fn update_tag_sees_default_on_miss() {
    // Goal: The operator receives the tag default when the slot is empty
    let tag = Tag::int("with_default").default_value(|| 100);
    let store = TagStore::new();
    assert_eq!(store.update_and_get_tag(&tag, |v| v.map(|n| n + 1)), Some(101));
}

#[test]
fn custom_serializer_with_copy_hook() {
    // Goal: Caller-supplied serializers and deep-copy hooks round-trip
    let tag = Tag::from_serializer(
        "ids",
        crate::types::nbt::TagType::IntArray,
        |v: &Vec<i32>| BinaryTag::IntArray(v.clone()),
        |t| match t {
            BinaryTag::IntArray(v) => Some(v.clone()),
            _ => None,
        },
    )
    .copy_with(|v| v.clone());

    let store = TagStore::new();
    store.set_tag(&tag, vec![1, 2, 3]);
    assert_eq!(store.get_tag(&tag), Some(vec![1, 2, 3]));

    let rebuilt = TagStore::from_compound(&store.as_compound());
    assert_eq!(rebuilt.get_tag(&tag), Some(vec![1, 2, 3]));
}

#[test]
fn readable_copy_is_a_stable_snapshot() {
    // Goal: A readable copy does not observe later writes; a fresh copy does
    let tag = Tag::int("k");
    let store = TagStore::new();
    store.set_tag(&tag, 1);

    let snapshot = store.readable_copy();
    store.set_tag(&tag, 2);

    assert_eq!(snapshot.get_tag(&tag), Some(1));
    assert_eq!(store.readable_copy().get_tag(&tag), Some(2));
    assert_eq!(store.get_tag(&tag), Some(2));
}

#[test]
fn clone_is_deep() {
    // Goal: A cloned store evolves independently of the original
    let tag = Tag::int("k").with_path(&["p"]);
    let store = TagStore::new();
    store.set_tag(&tag, 1);

    let clone = store.clone();
    store.set_tag(&tag, 2);

    assert_eq!(clone.get_tag(&tag), Some(1));
    assert_eq!(store.get_tag(&tag), Some(2));
    assert_ne!(clone.as_compound(), store.as_compound());
}

#[test]
fn clear_tags_empties_the_store() {
    // Goal: clear_tags drops everything and resets the serialized form
    let store = TagStore::new();
    store.set_tag(&Tag::int("a"), 1);
    store.set_tag(&Tag::int("b").with_path(&["p"]), 2);

    store.clear_tags();
    assert_eq!(store.get_tag(&Tag::int("a")), None);
    assert_eq!(store.get_tag(&Tag::int("b").with_path(&["p"])), None);
    assert!(store.as_compound().is_empty());
}

#[test]
fn empty_child_compounds_are_pruned() {
    // Goal: Removing the last tag of a subtree prunes it from output
    let tag = Tag::int("k").with_path(&["p"]);
    let store = TagStore::new();
    store.set_tag(&tag, 5);
    store.remove_tag(&tag);

    assert!(store.as_compound().is_empty());
    assert_eq!(store.get_tag(&tag), None);
}

#[test]
fn repeated_writes_refresh_serialized_form() {
    // Goal: The lock-free in-place write path invalidates cached compounds
    let tag = Tag::int("k");
    let store = TagStore::new();

    store.set_tag(&tag, 1);
    let first = store.as_compound();
    store.set_tag(&tag, 2);
    let second = store.as_compound();

    assert_eq!(first, Compound::builder().put("k", BinaryTag::Int(1)).build());
    assert_eq!(second, Compound::builder().put("k", BinaryTag::Int(2)).build());
}

#[test]
fn update_content_replaces_and_keeps_invalidation_wired() {
    // Goal: After wholesale replacement, writes inside adopted subtrees
    // still invalidate the root's cached compound
    let store = TagStore::new();
    store.set_tag(&Tag::int("stale"), 1);

    let replacement = Compound::builder()
        .put(
            "p",
            BinaryTag::Compound(Compound::builder().put("k", BinaryTag::Int(5)).build()),
        )
        .build();
    store.update_content(&replacement);
    assert_eq!(store.as_compound(), replacement);
    assert_eq!(store.get_tag(&Tag::int("stale")), None);

    // Write through the adopted subtree and observe it at the root.
    store.set_tag(&Tag::int("k").with_path(&["p"]), 6);
    let expected = Compound::builder()
        .put(
            "p",
            BinaryTag::Compound(Compound::builder().put("k", BinaryTag::Int(6)).build()),
        )
        .build();
    assert_eq!(store.as_compound(), expected);
}

#[test]
fn racing_writers_on_one_path_slot() {
    // Goal: Two threads racing the same path tag leave one of their values,
    // never a torn state
    for _ in 0..50 {
        let store = Arc::new(TagStore::new());
        let writers: Vec<_> = [1, 5]
            .into_iter()
            .map(|value| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.set_tag(&Tag::int("key").with_path(&["path"]), value);
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let compound = store.as_compound();
        let shape = |v: i32| {
            Compound::builder()
                .put(
                    "path",
                    BinaryTag::Compound(Compound::builder().put("key", BinaryTag::Int(v)).build()),
                )
                .build()
        };
        assert!(
            compound == shape(1) || compound == shape(5),
            "unexpected compound {:?}",
            compound
        );
    }
}

#[test]
fn racing_leaf_and_path_writers_share_a_key() {
    // Goal: A leaf named like a path segment and a nested tag can race;
    // the serialized key resolves to one of the two shapes
    for _ in 0..50 {
        let store = Arc::new(TagStore::new());
        let leaf = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.set_tag(&Tag::int("path"), 1))
        };
        let nested = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.set_tag(&Tag::int("key").with_path(&["path"]), 5))
        };
        leaf.join().unwrap();
        nested.join().unwrap();

        let compound = store.as_compound();
        let flat = Compound::builder().put("path", BinaryTag::Int(1)).build();
        let deep = Compound::builder()
            .put(
                "path",
                BinaryTag::Compound(Compound::builder().put("key", BinaryTag::Int(5)).build()),
            )
            .build();
        assert!(
            compound == flat || compound == deep,
            "unexpected compound {:?}",
            compound
        );
    }
}

#[test]
fn concurrent_readers_during_writes() {
    // Goal: Lock-free readers always see a committed value for their tag
    let tag = Tag::int("stable");
    let churn = Tag::int("churn").with_path(&["p"]);
    let store = Arc::new(TagStore::new());
    store.set_tag(&tag, 7);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..3 {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        let tag = tag.clone();
        readers.push(thread::spawn(move || {
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                assert_eq!(store.get_tag(&tag), Some(7));
            }
        }));
    }

    for round in 0..500 {
        store.set_tag(&churn, round);
        store.as_compound();
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
}
