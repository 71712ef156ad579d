use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringfan::{Channel, Config};
use std::hint::black_box;
use std::thread;

const MESSAGES: u64 = 1_000_000;
const BATCH: usize = 4096;

fn feed(producer: &ringfan::Producer<u32>, count: u64) {
    let mut sent = 0u64;
    while sent < count {
        let want = BATCH.min((count - sent) as usize);
        match producer.reserve(want) {
            Some(mut reservation) => {
                let cells = reservation.as_mut_slice();
                for (i, cell) in cells.iter_mut().enumerate() {
                    cell.write((sent + i as u64) as u32);
                }
                let n = cells.len() as u64;
                reservation.commit();
                sent += n;
            }
            None => std::hint::spin_loop(),
        }
    }
}

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MESSAGES));
    group.sample_size(10);

    group.bench_function("reserve_commit_batches", |b| {
        b.iter(|| {
            let channel = Channel::<u32>::new(Config::default());
            let producer = channel.register_producer().unwrap();
            let consumer = channel.clone();

            let feeder = thread::spawn(move || feed(&producer, MESSAGES));

            let mut seen = 0u64;
            while seen < MESSAGES {
                seen += consumer.consume_all(|item| {
                    black_box(item);
                }) as u64;
            }
            feeder.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");
    group.sample_size(10);

    for &producers in &[2usize, 4, 8] {
        let goal = MESSAGES * producers as u64;
        group.throughput(Throughput::Elements(goal));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{producers}p")),
            &producers,
            |b, &n| {
                b.iter(|| {
                    let channel = Channel::<u32>::new(Config::default());

                    let feeders: Vec<_> = (0..n)
                        .map(|_| {
                            let producer = channel.register_producer().unwrap();
                            thread::spawn(move || feed(&producer, MESSAGES))
                        })
                        .collect();

                    let mut seen = 0u64;
                    while seen < goal {
                        seen += channel.consume_all(|item| {
                            black_box(item);
                        }) as u64;
                    }
                    for feeder in feeders {
                        feeder.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc);
criterion_main!(benches);
