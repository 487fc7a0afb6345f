// Copyright (c) 2026 Oblipass Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use clap::Parser;
use tracing_subscriber::EnvFilter;

use oblipass_daemon::config::Args;
use oblipass_daemon::server::OblipassService;
use oblipass_protocol::pb::oblipass_server::OblipassServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log.clone()))
        .init();

    let addr = args.listen_addr()?;
    let svc = OblipassService::build(&args)?;

    tracing::info!(
        %addr,
        role = ?args.role,
        strategy = ?args.strategy,
        version = oblipass_protocol::SERVER_VERSION,
        "starting oblipass gRPC server"
    );

    tonic::transport::Server::builder()
        .add_service(OblipassServer::new(svc))
        .serve(addr)
        .await?;

    Ok(())
}
