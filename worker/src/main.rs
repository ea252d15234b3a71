use darkpool_worker::{Worker, WorkerEnv};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    info!("darkpool worker starting");

    let worker = Worker::new(WorkerEnv::from_env());
    let descriptor = worker.run().await;

    // The enclave runtime reads computed.json; the exit code stays 0 either way.
    if descriptor.is_success() {
        info!(output = %descriptor.deterministic_output_path, "worker finished");
    } else {
        info!(output = %descriptor.deterministic_output_path, "worker finished with error");
    }
}
