use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rewind_core::heap::reference::property_id;
use rewind_core::{
    ActionOp, EventLog, Format, LogValue, MemoryStreams, ReferenceHeap, SnapshotExtractor, TtdConfig,
};

fn recorded_log(format: Format, objects: usize) -> EventLog {
    let config = TtdConfig {
        format,
        snap_interval_ms: 60_000,
        ..TtdConfig::default()
    };
    let mut log = EventLog::new(config).unwrap();
    log.init_for_record();
    let mut heap = ReferenceHeap::new();
    let ctx = heap.create_context(&mut log, "bench.js").unwrap();
    let global = heap.global_object(&mut log, ctx).unwrap();
    for i in 0..objects {
        let obj = heap
            .perform(&mut log, ctx, ActionOp::AllocateObject { is_external: false })
            .unwrap();
        heap.perform(
            &mut log,
            ctx,
            ActionOp::SetProperty {
                object: obj.clone(),
                pid: property_id("value"),
                value: LogValue::String(format!("item {}", i)),
                use_strict: false,
            },
        )
        .unwrap();
        heap.perform(
            &mut log,
            ctx,
            ActionOp::SetProperty {
                object: global.clone(),
                pid: property_id(&format!("o{}", i)),
                value: obj,
                use_strict: false,
            },
        )
        .unwrap();
    }
    log.do_snapshot_extract(&heap).unwrap();
    log
}

fn bench_emit_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_log");
    for format in [Format::Text, Format::Binary] {
        let log = recorded_log(format, 500);
        group.throughput(Throughput::Elements(log.len() as u64));
        group.bench_with_input(BenchmarkId::new("events", format!("{:?}", format)), &log, |b, log| {
            b.iter(|| {
                let streams = MemoryStreams::new();
                log.emit_log(black_box(&streams)).unwrap();
                streams
            });
        });
    }
    group.finish();
}

fn bench_parse_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_log");
    for format in [Format::Text, Format::Binary] {
        let log = recorded_log(format, 500);
        let streams = MemoryStreams::new();
        log.emit_log(&streams).unwrap();
        group.bench_with_input(BenchmarkId::new("events", format!("{:?}", format)), &streams, |b, streams| {
            b.iter(|| {
                let mut restored = EventLog::new(TtdConfig::default()).unwrap();
                restored.parse_log_into(black_box(streams)).unwrap();
                restored.load_snapshots(streams).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut log = EventLog::new(TtdConfig::default()).unwrap();
    log.init_for_record();
    let mut heap = ReferenceHeap::new();
    let ctx = heap.create_context(&mut log, "bench.js").unwrap();
    let global = heap.context_global(ctx).unwrap();
    for i in 0..2_000 {
        let obj = heap.new_object(ctx).unwrap();
        let s = heap.new_string(ctx, &format!("v{}", i)).unwrap();
        heap.set_named(obj, "v", s).unwrap();
        heap.set_named(global, &format!("k{}", i), rewind_core::snapshot::Var::Ref(obj)).unwrap();
    }

    c.bench_function("extract_2000_objects", |b| {
        b.iter(|| SnapshotExtractor::new().extract(black_box(&heap), 0.0).unwrap());
    });
}

criterion_group!(benches, bench_emit_log, bench_parse_log, bench_extract);
criterion_main!(benches);
