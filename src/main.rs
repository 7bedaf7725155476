#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;

use milightd::controller::{Controller, ControllerConfig};
use milightd::server;

#[derive(Debug, StructOpt)]
#[structopt(name = "milightd", about = "Mi-Light control daemon")]
struct Opts {
    /// Log verbosity. Overrides logger level from the MILIGHTD_LOG variable
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    /// Address of the Mi-Light bridge
    #[structopt(long)]
    mihost: String,
    /// UDP port of the Mi-Light bridge
    #[structopt(long, default_value = "5987")]
    miport: u16,
    /// Port the HTTP API listens on
    #[structopt(short, long, default_value = "8080")]
    port: u16,
    /// Directory for stored sequences
    #[structopt(long, default_value = "store", parse(from_os_str))]
    store: PathBuf,
}

async fn run(opts: Opts) -> color_eyre::eyre::Result<()> {
    let controller = Arc::new(Controller::new(
        &opts.mihost,
        opts.miport,
        &opts.store,
        &ControllerConfig::default(),
    )?);

    let server = server::bind(opts.port, controller.clone()).await?;
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await?;
    info!("got ctrl-c, terminating");

    server_task.abort();
    controller.close().await;

    Ok(())
}

fn install_tracing(verbose: u32) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let fmt_layer = fmt::layer();
    let filter_layer = EnvFilter::try_from_env("MILIGHTD_LOG")
        .or_else(|_| {
            EnvFilter::try_new(match verbose {
                0 => "milightd=warn",
                1 => "milightd=info",
                2 => "milightd=debug",
                _ => "milightd=trace",
            })
        })
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

#[paw::main]
fn main(opts: Opts) -> color_eyre::eyre::Result<()> {
    install_tracing(opts.verbose);
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(match num_cpus::get() {
            1 => 2,
            other => other.min(4),
        })
        .enable_all()
        .build()?
        .block_on(run(opts))
}
