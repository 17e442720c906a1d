use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::{stream, StreamExt};
use places_scraper::{
    parse_places, CollectingSink, Config, ItemProcessor, Place, Pipeline, ResourceFactory,
    ScrapeError, WorkItem, WorkerPool,
};
use std::time::Duration;
use tokio::runtime::Runtime;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

struct NoopFactory;

#[async_trait]
impl ResourceFactory for NoopFactory {
    type Resource = usize;

    async fn create(&self, id: usize) -> Result<usize, ScrapeError> {
        Ok(id)
    }

    async fn destroy(&self, _id: usize, _resource: usize) -> Result<(), ScrapeError> {
        Ok(())
    }
}

struct TargetLength;

#[async_trait]
impl ItemProcessor<usize, Place> for TargetLength {
    type Outcome = usize;

    async fn process(
        &self,
        _worker: &mut usize,
        _place: &Place,
        target: &str,
    ) -> Result<usize, ScrapeError> {
        tokio::task::yield_now().await;
        Ok(target.len())
    }
}

fn places(count: usize) -> Vec<Place> {
    (0..count)
        .map(|i| Place {
            id: i.to_string(),
            name: format!("Place {i}"),
            google_map_url: format!("https://www.google.com/maps/place/{i}/review"),
            ..Default::default()
        })
        .collect()
}

fn benchmark_pool_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool");
    configure_fast_group(&mut group);

    let rt = Runtime::new().unwrap();
    let pool = rt.block_on(async { WorkerPool::new((0..16).collect::<Vec<usize>>()) });

    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let lease = pool.try_acquire().unwrap();
            black_box(lease.id());
            pool.release(lease);
        });
    });

    group.finish();
}

fn benchmark_place_target(c: &mut Criterion) {
    let mut group = c.benchmark_group("place");
    configure_fast_group(&mut group);

    let batch = places(3);

    group.bench_function("target", |b| {
        b.iter(|| {
            for place in &batch {
                black_box(place.target());
            }
        });
    });

    group.finish();
}

fn benchmark_csv_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("csv");
    configure_fast_group(&mut group);

    let mut input = String::from("id,order,name,province,city,code,active,googleMapUrl\n");
    for i in 0..200 {
        input.push_str(&format!(
            "{i},{i},Place {i},Madrid,Madrid,28001,true,https://www.google.com/maps/place/{i}/review\n"
        ));
    }
    let rt = Runtime::new().unwrap();

    group.bench_function("parse_200_rows", |b| {
        b.to_async(&rt).iter(|| async {
            let rows: Vec<_> = parse_places(input.clone().into_bytes()).collect().await;
            black_box(rows);
        });
    });

    group.finish();
}

fn benchmark_in_memory_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    configure_fast_group(&mut group);

    let rt = Runtime::new().unwrap();
    let config = Config {
        pool_size: 5,
        reserved_workers: 2,
        acquire_poll_interval: Duration::from_millis(5),
        ..Default::default()
    };

    group.bench_function("100_items", |b| {
        b.to_async(&rt).iter(|| async {
            let pipeline = Pipeline::new(config.clone(), NoopFactory, TargetLength);
            let mut sink = CollectingSink::new();
            let input = stream::iter(places(100).into_iter().map(Ok));
            let report = pipeline.run(input, &mut sink).await.unwrap();
            black_box(report);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_pool_checkout,
    benchmark_place_target,
    benchmark_csv_parsing,
    benchmark_in_memory_pipeline
);
criterion_main!(benches);
