use bounded_pipeline::sink::Count;
use bounded_pipeline::{
    BoundedQueue, EventLog, IterSource, MapStage, PipelineBuilder, PipelineConfig, RecordError,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::thread;
use std::time::Duration;

fn benchmark_queue_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contention");

    for capacity in [1usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let queue = BoundedQueue::new(capacity).expect("capacity");
                let producers: Vec<_> = (0..4)
                    .map(|_| {
                        let queue = queue.clone();
                        thread::spawn(move || {
                            for i in 0..2_500u32 {
                                let _ = queue.push(black_box(i));
                            }
                        })
                    })
                    .collect();

                let consumer = {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        let mut received = 0u32;
                        while queue.pop().is_some() {
                            received += 1;
                        }
                        received
                    })
                };

                for producer in producers {
                    producer.join().expect("producer");
                }
                queue.close();
                black_box(consumer.join().expect("consumer"))
            });
        });
    }
    group.finish();
}

fn benchmark_slow_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("slow_stage");
    group.sample_size(10);

    for capacity in [1usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let config = PipelineConfig::new()
                    .with_queue_capacity(capacity)
                    .with_record_logging(false);
                let report = PipelineBuilder::with_config(config)
                    .event_log(EventLog::discard())
                    .producers(vec![IterSource::new(0..500u32), IterSource::new(0..500u32)])
                    .expect("producers")
                    .stage("slow", 2, |_| {
                        MapStage::new("slow", |v: u32| {
                            thread::sleep(Duration::from_micros(50));
                            Ok::<_, RecordError>(v)
                        })
                    })
                    .expect("stage")
                    .run(Count::new())
                    .expect("run");
                black_box(report.output)
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_queue_contention, benchmark_slow_stage
);
criterion_main!(benches);
