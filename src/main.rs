use anyhow::Context;
use busprov::{config::Opts, EntityProvisioner, ProvisioningRequest};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn inner_main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = opts.transport_config()?;
    let request = ProvisioningRequest::from_config(&config);
    let provisioner = EntityProvisioner::from_config(&config)
        .context("failed to set up the management backend")?;

    // ctrl-c stops further creations, the connection is still released
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling provisioning");
            on_signal.cancel();
        }
    });

    let report = provisioner.provision(&request, &cancel).await?;
    info!("{} of {} entities created", report.created(), report.entities.len());

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = inner_main().await {
        error!("{:?}", e);
        std::process::exit(1);
    }
}
