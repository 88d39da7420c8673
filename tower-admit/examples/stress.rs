use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use admit_limit::Algorithm;
use admit_limit::LimiterConfig;
use clap::Parser;
use clap::ValueEnum;
use hdrhistogram::Histogram;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_admit::AdmitError;
use tower_admit::ManagedAdmissionLayer;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    LeakyBucket,
    Gcra,
}

/// Fire a burst of concurrent requests through the managed admission stack.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, value_enum, default_value_t = Kind::LeakyBucket)]
    algorithm: Kind,

    #[arg(long, default_value_t = 10)]
    capacity: usize,

    #[arg(long, default_value = "200ms", value_parser = humantime::parse_duration)]
    refill_interval: Duration,

    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Simulated latency of the costly backend
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    backend_latency: Duration,

    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    max_wait: Duration,
}

#[derive(Default)]
struct Outcomes {
    admitted: usize,
    rate_limited: usize,
    timeouts: usize,
    sheds: usize,
    inner: usize,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = LimiterConfig {
        algorithm: match args.algorithm {
            Kind::LeakyBucket => Algorithm::LeakyBucket,
            Kind::Gcra => Algorithm::Gcra,
        },
        capacity: args.capacity,
        refill_interval: args.refill_interval,
    };
    let strategy = config.build()?;

    let latency = args.backend_latency;
    let backend = service_fn(move |_req: ()| async move {
        sleep(latency).await;
        Ok::<_, BoxError>("classified")
    });
    let svc = ManagedAdmissionLayer::new(strategy, args.max_wait).layer(backend);

    println!("Starting stress test: {config:?}");
    println!("Requests: {}, backend latency: {latency:?}\n", args.requests);

    let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let mut outcomes = Outcomes::default();
    let mut tasks = JoinSet::new();
    let barrier = Arc::new(Barrier::new(args.requests));

    let start = Instant::now();
    for _ in 0..args.requests {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(()).await,
                Err(e) => Err(e),
            };
            (res, req_start.elapsed())
        });
    }

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task?;
        match res {
            Ok(_) => {
                outcomes.admitted += 1;
                hist.record(elapsed.as_micros() as u64)?;
            }
            Err(e) => match e.downcast_ref::<AdmitError>() {
                Some(AdmitError::RateLimited { .. }) => outcomes.rate_limited += 1,
                Some(AdmitError::Timeout) => outcomes.timeouts += 1,
                Some(AdmitError::Overloaded) => outcomes.sheds += 1,
                Some(AdmitError::Inner(_)) | None => outcomes.inner += 1,
            },
        }
    }
    let total_duration = start.elapsed();

    println!("Total Duration:  {total_duration:.2?}");
    println!("Admitted/Total:  {}/{}", outcomes.admitted, args.requests);
    if outcomes.admitted > 0 {
        println!("P50 (Elapsed):   {}µs", hist.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}µs", hist.value_at_quantile(0.99));
    }
    println!("Rate Limited:    {}", outcomes.rate_limited);
    println!("Timeouts:        {}", outcomes.timeouts);
    println!("LoadSheds:       {}", outcomes.sheds);
    println!("Inner:           {}", outcomes.inner);

    Ok(())
}
