//! Timer example - a coroutine parks on a steady timer, then returns a value

use fiber_await::prelude::*;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("=== Timer Await Example ===\n");

    let ctx = ExecutionContext::with_threads(2).expect("Failed to start execution context");

    let start = Instant::now();
    let outcome = ctx.spawn(|cx| {
        let mut timer = SteadyTimer::new(cx.handle());
        timer.expires_after(Duration::from_secs(3));

        println!("[{}] waiting 3s on the timer...", cx.id());
        cx.wait(adapt::<(), _>(|h| timer.async_wait(h)))?;
        println!("[{}] timer fired", cx.id());

        Ok(1)
    });

    match outcome.wait() {
        Ok(value) => println!("Outcome: {} after {:?}", value, start.elapsed()),
        Err(err) => println!("Outcome: failed: {}", err),
    }

    #[cfg(feature = "telemetry")]
    {
        let m = ctx.metrics();
        println!("\n--- Runtime Metrics ---");
        println!("Jobs executed:       {}", m.tasks_executed);
        println!("Coroutines spawned:  {}", m.coroutines_spawned);
        println!("Coroutine resumes:   {}", m.coroutines_resumed);
        println!("Avg job latency:     {}ns", m.avg_latency_ns);
    }

    ctx.shutdown();
}
