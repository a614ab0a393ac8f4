//! Entry point for the `nimbus-worker` metrics process.
//!
//! Spawned once per running VM. Writes samples to stdout and logs to
//! stderr; exits only when signalled or when stdout is closed.

use std::time::Duration;

use clap::Parser;
use nimbus_core::VmId;
use nimbus_executor::config::{SAMPLE_INTERVAL_ENV, VM_ID_ENV};
use nimbus_executor::sampler::{run_sampling_loop, HostSampler};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nimbus-worker", about = "Samples host CPU and memory for one simulated VM")]
struct Args {
    /// VM this worker reports for.
    #[arg(long, env = VM_ID_ENV)]
    vm_id: u32,

    /// Milliseconds between samples.
    #[arg(long, env = SAMPLE_INTERVAL_ENV, default_value_t = 5000)]
    interval_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let vm_id = VmId(args.vm_id);

    tracing::info!(vm_id = %vm_id, interval_ms = args.interval_ms, "VM started");

    let mut sampler = HostSampler::new();
    let mut stdout = tokio::io::stdout();
    let interval = Duration::from_millis(args.interval_ms);

    if let Err(e) = run_sampling_loop(vm_id, interval, &mut sampler, &mut stdout).await {
        tracing::error!(vm_id = %vm_id, error = %e, "worker stopped");
        std::process::exit(1);
    }
}
