//! Admission-queue throughput under the blocking backpressure policy.

use std::time::Duration;

use async_trait::async_trait;
use bulkjob::core::{JobError, Task, TaskContext, WorkerPool};
use criterion::{criterion_group, criterion_main, Criterion};

struct NoopTask;

#[async_trait]
impl Task for NoopTask {
    fn setup(&mut self, _ctx: TaskContext) -> Result<(), JobError> {
        Ok(())
    }

    async fn invoke(&mut self) -> Result<String, JobError> {
        Ok(String::new())
    }
}

fn admission_throughput(c: &mut Criterion) {
    c.bench_function("submit_and_drain_256", |b| {
        b.iter(|| {
            let pool = WorkerPool::new(4, 32).unwrap();
            let completions = pool.completions();
            for i in 0..256 {
                pool.submit(&format!("/bench-{i}"), Box::new(NoopTask))
                    .unwrap();
            }
            for _ in 0..256 {
                completions.recv_timeout(Duration::from_secs(10)).unwrap();
            }
            pool.shutdown(Duration::from_secs(2));
        });
    });
}

criterion_group!(benches, admission_throughput);
criterion_main!(benches);
