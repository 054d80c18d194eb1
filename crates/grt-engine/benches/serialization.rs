use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use grt_engine::{ClassBinding, Grt, GrtOptions, ObjectRef, ValueRef};

const STRUCTS: &str = r#"<gstructs>
  <gstruct name="bench.Item">
    <members>
      <member name="name" type="string"/>
      <member name="weight" type="real"/>
      <member name="next" type="object" struct-name="bench.Item"/>
    </members>
  </gstruct>
  <gstruct name="bench.Catalog">
    <members>
      <member name="items" type="list" content-type="object" content-struct-name="bench.Item" owned="1"/>
      <member name="labels" type="dict" content-type="string"/>
    </members>
  </gstruct>
</gstructs>"#;

fn setup() -> Grt {
    let grt = Grt::new(GrtOptions::default());
    grt.register_class("bench.Item", ClassBinding::generic());
    grt.register_class("bench.Catalog", ClassBinding::generic());
    grt.load_metaclasses_from_str(STRUCTS, "structs.bench.xml").unwrap();
    grt.end_loading_metaclasses(true).unwrap();
    grt
}

fn catalog(grt: &Grt, size: usize) -> ObjectRef {
    let catalog = grt.create_object("bench.Catalog").unwrap();
    let items = catalog.get_list_member("items").unwrap();
    let labels = catalog.get_dict_member("labels").unwrap();
    let mut previous: Option<ObjectRef> = None;
    for i in 0..size {
        let item = grt.create_object("bench.Item").unwrap();
        item.set_member("name", format!("item-{}", i)).unwrap();
        item.set_member("weight", i as f64 * 0.25).unwrap();
        if let Some(prev) = &previous {
            item.set_member("next", prev.clone()).unwrap();
        }
        labels.set(format!("k{}", i), format!("label {}", i)).unwrap();
        items.ginsert(item.clone()).unwrap();
        previous = Some(item);
    }
    catalog
}

fn bench_serialize(c: &mut Criterion) {
    let grt = setup();
    let mut group = c.benchmark_group("serialize");

    for size in [10usize, 100, 1000] {
        let value: ValueRef = catalog(&grt, size).into();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("catalog", size), &value, |b, value| {
            b.iter(|| grt.serialize_to_string(black_box(value), "bench", "1").unwrap());
        });
    }

    group.finish();
}

fn bench_unserialize(c: &mut Criterion) {
    let grt = setup();
    let mut group = c.benchmark_group("unserialize");

    for size in [10usize, 100, 1000] {
        let xml = grt
            .serialize_to_string(&catalog(&grt, size).into(), "bench", "1")
            .unwrap();
        group.throughput(Throughput::Bytes(xml.len() as u64));
        group.bench_with_input(BenchmarkId::new("catalog", size), &xml, |b, xml| {
            b.iter(|| grt.unserialize_str(black_box(xml)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize, bench_unserialize);
criterion_main!(benches);
