//! Stress test - many concurrent step loops
//!
//! Spawns a large number of `StepLoop`s whose sub-operations are
//! completed by a fixed pool of worker threads, so loops constantly
//! resume on foreign threads and race their own spurious `iterate()`
//! calls.

use crossbeam_queue::ArrayQueue;
use opflow::{Cause, Completion, SharedCompletion, Step, StepLoop};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Completions handed to the pool; workers signal each one.
struct Pool {
    queue: ArrayQueue<SharedCompletion>,
    shutdown: AtomicBool,
}

impl Pool {
    fn submit(&self, done: SharedCompletion) {
        let mut done = done;
        // Bounded queue; spin on the rare full case.
        while let Err(back) = self.queue.push(done) {
            done = back;
            thread::yield_now();
        }
    }
}

fn worker_loop(pool: Arc<Pool>) {
    loop {
        match pool.queue.pop() {
            Some(done) => done.succeeded(),
            None => {
                if pool.shutdown.load(Ordering::Relaxed) {
                    return;
                }
                thread::yield_now();
            }
        }
    }
}

fn main() {
    println!("=== opflow Stress Test ===\n");

    let num_flows: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);
    let steps_per_flow: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    let num_workers: usize = 8;

    println!(
        "Running {} step loops x {} async steps on {} workers...",
        num_flows, steps_per_flow, num_workers
    );

    let pool = Arc::new(Pool {
        // At most one outstanding sub-operation per loop.
        queue: ArrayQueue::new(num_flows.max(1)),
        shutdown: AtomicBool::new(false),
    });

    let workers: Vec<_> = (0..num_workers)
        .map(|worker_id| {
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name(format!("opflow-worker-{}", worker_id))
                .spawn(move || worker_loop(pool))
                .expect("failed to spawn worker thread")
        })
        .collect();

    let completed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut flows = Vec::with_capacity(num_flows);
    for i in 0..num_flows {
        let pool = Arc::clone(&pool);
        let completed = Arc::clone(&completed);
        let mut remaining = steps_per_flow;

        let flow = StepLoop::from_fn(move |flow| {
            if remaining == 0 {
                completed.fetch_add(1, Ordering::Relaxed);
                return Ok(Step::Done);
            }
            remaining -= 1;
            pool.submit(flow.handle());
            Ok(Step::Pending)
        });
        flow.iterate();
        flows.push(flow);

        // Progress indicator
        if (i + 1) % 1000 == 0 {
            print!("\rStarted: {}/{}", i + 1, num_flows);
        }
    }

    let spawn_time = start.elapsed();
    println!("\n\nStart time: {:?}", spawn_time);

    // Wait for completion, hammering spurious iterates along the way.
    println!("\nWaiting for completion...");
    let run_start = Instant::now();

    loop {
        let done = completed.load(Ordering::Relaxed) as usize;
        if done >= num_flows {
            break;
        }

        if run_start.elapsed().as_secs() > 30 {
            println!("Timeout! Only {}/{} completed", done, num_flows);
            for flow in &flows {
                flow.abort(Cause::new("stress timeout"));
            }
            break;
        }

        for flow in flows.iter().take(64) {
            flow.iterate();
        }

        print!("\rCompleted: {}/{}", done, num_flows);
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let total_time = start.elapsed();
    let succeeded = flows.iter().filter(|f| f.is_succeeded()).count();
    let total_steps = num_flows * (steps_per_flow + 1);

    pool.shutdown.store(true, Ordering::SeqCst);
    for handle in workers {
        handle.join().expect("worker panicked");
    }

    println!("\n\n=== Results ===");
    println!("Total loops:   {}", num_flows);
    println!("Completed:     {}", completed.load(Ordering::Relaxed));
    println!("Succeeded:     {}", succeeded);
    println!("Total time:    {:?}", total_time);
    println!(
        "Throughput:    {:.0} steps/sec",
        total_steps as f64 / total_time.as_secs_f64()
    );

    println!("\n=== Stress Test Complete ===");
}
