use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tagstore::{BinaryTag, Tag, TagReadable, TagStore};

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_read");

    let store = TagStore::new();
    let tag = Tag::string("key");
    store.set_tag(&tag, "value".to_string());
    let second_tag = Tag::string("key");

    group.bench_function("constant_tag", |b| {
        b.iter(|| black_box(store.get_tag(&tag)));
    });
    group.bench_function("different_instance", |b| {
        b.iter(|| black_box(store.get_tag(&second_tag)));
    });
    group.bench_function("new_tag", |b| {
        b.iter(|| black_box(store.get_tag(&Tag::string("key"))));
    });

    let path_store = TagStore::new();
    let path_tag = Tag::int("key").with_path(&["a", "b"]);
    path_store.set_tag(&path_tag, 5);
    group.bench_function("path_tag", |b| {
        b.iter(|| black_box(path_store.get_tag(&path_tag)));
    });

    let missing = Tag::string("missing");
    group.bench_function("absent_tag", |b| {
        b.iter(|| black_box(store.get_tag(&missing)));
    });

    group.finish();
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_write");

    let store = TagStore::new();
    let tag = Tag::string("key");
    store.set_tag(&tag, "value".to_string());
    let second_tag = Tag::string("key");

    group.bench_function("constant_tag", |b| {
        b.iter(|| store.set_tag(&tag, "value".to_string()));
    });
    group.bench_function("different_instance", |b| {
        b.iter(|| store.set_tag(&second_tag, "value".to_string()));
    });
    group.bench_function("new_tag", |b| {
        b.iter(|| store.set_tag(&Tag::string("key"), "value".to_string()));
    });

    group.bench_function("write_then_serialize", |b| {
        let store = TagStore::new();
        let tag = Tag::int("n");
        let mut n = 0;
        b.iter(|| {
            store.set_tag(&tag, n);
            n += 1;
            black_box(store.as_compound())
        });
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_serialize");

    let store = TagStore::new();
    for i in 0..32i64 {
        store.set_tag(&Tag::long(&format!("key{}", i)), i);
    }
    store.set_tag(&Tag::nbt("list"), BinaryTag::List(vec![BinaryTag::Int(1); 16]));

    group.bench_function("cached_compound", |b| {
        b.iter(|| black_box(store.as_compound()));
    });

    group.finish();
}

criterion_group!(benches, bench_reads, bench_writes, bench_serialization);
criterion_main!(benches);
