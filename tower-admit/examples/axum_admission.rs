use std::path::PathBuf;
use std::time::Duration;

use admit_limit::LimiterConfig;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Query;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use serde::Deserialize;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_admit::AdmitError;
use tower_admit::ManagedAdmissionLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve a text endpoint gated by admission control.
#[derive(Parser, Debug)]
struct Args {
    /// YAML limiter configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8090")]
    listen: String,

    /// Upper bound on the time spent in the classifier
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    max_wait: Duration,
}

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    input: String,
}

// Stands in for the external classification call
async fn classify(Query(params): Query<Params>) -> String {
    params.input
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();

    // 1. Setup Strategy
    let config = match &args.config {
        Some(path) => LimiterConfig::from_file(path)?,
        None => LimiterConfig::default(),
    };
    let strategy = config.build()?;

    // 2. Setup Managed Layer
    let managed_layer = ManagedAdmissionLayer::<_, Request>::new(strategy, args.max_wait);

    // 3. Build the Router
    let app = Router::new().route("/", get(classify)).layer(
        ServiceBuilder::new()
            // The outermost layer: catches BoxError and returns Response
            .layer(HandleErrorLayer::new(handle_admit_error))
            // The middle layer: introduces BoxError
            .layer(managed_layer)
            // Converts the Route's Infallible to BoxError so that
            // ManagedAdmissionLayer can wrap it.
            .map_err(BoxError::from),
    );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_admit_error(err: BoxError) -> impl IntoResponse {
    if let Some(admit_err) = err.downcast_ref::<AdmitError>() {
        admit_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
