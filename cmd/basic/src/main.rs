//! Basic opflow example
//!
//! Drives a multi-chunk write through a fake asynchronous sink: each
//! chunk is handed to a sink thread which completes it later, and a
//! `StepLoop` feeds the next chunk as each completion arrives. A
//! `Promise` bridges the loop's terminal state back to `main`.

use opflow::promise;
use opflow::{Cause, Completion, Promise, Step, StepLoop, Steps};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A chunk travelling to the sink thread, with the completion to signal
/// once it has been "written".
struct Chunk {
    data: &'static str,
    done: opflow::SharedCompletion,
}

struct ChunkedWrite {
    chunks: Vec<&'static str>,
    next: usize,
    sink: mpsc::Sender<Chunk>,
    outcome: Promise,
}

impl Steps for ChunkedWrite {
    fn step(&mut self, flow: &StepLoop) -> Result<Step, Cause> {
        if self.next >= self.chunks.len() {
            return Ok(Step::Done);
        }
        let data = self.chunks[self.next];
        self.next += 1;
        println!("Submitting chunk {}: {:?}", self.next, data);
        self.sink
            .send(Chunk {
                data,
                done: flow.handle(),
            })
            .map_err(|e| Cause::from_error(Box::new(e)))?;
        Ok(Step::Pending)
    }

    fn on_success(&mut self) {
        self.outcome.complete();
    }

    fn on_failure(&mut self, cause: &Cause) {
        self.outcome.fail(cause.clone());
    }
}

fn main() {
    println!("=== opflow Basic Example ===\n");

    // The fake sink: completes each chunk after a short delay.
    let (tx, rx) = mpsc::channel::<Chunk>();
    let sink = thread::spawn(move || {
        for chunk in rx {
            thread::sleep(Duration::from_millis(20));
            println!("Sink wrote {:?}", chunk.data);
            chunk.done.succeeded();
        }
    });

    let outcome = Promise::new();
    let flow = StepLoop::new(ChunkedWrite {
        chunks: vec!["GET /", " HTTP/1.1", "\r\n", "Host: example", "\r\n\r\n"],
        next: 0,
        sink: tx,
        outcome: outcome.clone(),
    });

    flow.iterate();

    match outcome.wait_timeout(Duration::from_secs(10)) {
        Some(Ok(())) => println!("\nAll chunks written"),
        Some(Err(cause)) => println!("\nWrite failed: {}", cause),
        None => println!("\nWARNING: Timeout!"),
    }

    // A completion can also resolve a promise directly.
    let ack = Promise::new();
    let completion = promise::from_promise(ack.clone());
    completion.succeeded();
    println!("Direct completion resolved: {:?}", ack.try_result());

    // Dropping the loop drops its sender, which ends the sink thread.
    drop(flow);
    sink.join().expect("sink thread panicked");
    println!("\n=== Example Complete ===");
}
