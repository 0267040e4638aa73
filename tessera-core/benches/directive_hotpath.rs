use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tessera_core::{Int64Node, StorageKey, TreeCodec, TypeDescriptorBuilder};

const STRUCT_DIRECTIVE: &str =
    "keyf=id,kind=Animal,shape=dg,shapef=shape,pkeyf=owner_id,pkind=Person,auto,rc,pc,mc=false,pcto=5m";

fn bench_directive_parse(c: &mut Criterion) {
    let fields = [
        ("name", ""),
        ("tags", "dbname=t,index=y"),
        ("address", "ftype=struc"),
        ("attrs", "ftype=expando,store=y"),
        ("outline", "ftype=tree"),
    ];

    c.bench_function("directive/parse_and_build", |b| {
        b.iter(|| {
            let descriptor = TypeDescriptorBuilder::from_directives(black_box(STRUCT_DIRECTIVE), &fields)
                .and_then(TypeDescriptorBuilder::build)
                .expect("valid directive");
            black_box(descriptor.fields().len());
        });
    });
}

fn bench_key_decode(c: &mut Criterion) {
    let encoded = StorageKey::new("Animal", "dg", 9_001, Some(StorageKey::new("Person", "", 77, None))).encode();

    c.bench_function("key/decode_with_parent", |b| {
        b.iter(|| {
            let key = StorageKey::decode(black_box(&encoded)).expect("decode key");
            black_box(key.id());
        });
    });
}

fn bench_tree_codec(c: &mut Criterion) {
    let mut root = Int64Node::default();
    for i in 0..50 {
        let mut child = Int64Node::new(i);
        for j in 0..10 {
            child = child.with_child(Int64Node::new(i * 100 + j));
        }
        root = root.with_child(child);
    }
    let codec = TreeCodec::default();
    let flat = codec.encode_children(&root).expect("encode tree");

    c.bench_function("tree/decode_500_nodes", |b| {
        b.iter(|| {
            let tree = codec.decode_children(black_box(&flat)).expect("decode tree");
            black_box(tree.children.len());
        });
    });
}

criterion_group!(benches, bench_directive_parse, bench_key_decode, bench_tree_codec);
criterion_main!(benches);
