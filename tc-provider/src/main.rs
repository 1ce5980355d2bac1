use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use cdds_tc::{
    admin::{TcEndpointAdminServer, TcEndpointAdminService},
    authorization::SessionAuthorizer,
    cdds,
    endpoint::read_endpoints_file,
    provider::{ProviderContext, ProviderSettings, TcProviderService, TcServiceProviderServer},
    registry::EndpointRegistry,
    tls::TlsFiles,
};
use clap::Parser;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    #[clap(long, env = "TC_PROVIDER_ADDR", default_value = "0.0.0.0:6666")]
    addr: SocketAddr,
    /// Trust anchor for client certificates
    #[clap(long, env = "TC_PROVIDER_CA_CERT", requires_all = ["cert", "key"])]
    ca_cert: Option<PathBuf>,
    #[clap(long, env = "TC_PROVIDER_CERT", requires_all = ["ca_cert", "key"])]
    cert: Option<PathBuf>,
    #[clap(long, env = "TC_PROVIDER_KEY", requires_all = ["ca_cert", "cert"])]
    key: Option<PathBuf>,
    /// JSON array of endpoints allowed to open TC streams
    #[clap(long, env = "TC_PROVIDER_AUTHORIZED_ENDPOINTS")]
    authorized_endpoints: Option<PathBuf>,
    #[clap(long, env = "TC_PROVIDER_ENABLE_ADMIN")]
    enable_admin: bool,
    #[clap(long, env = "TC_PROVIDER_ENABLE_REFLECTION")]
    enable_reflection: bool,
    #[clap(long, env = "TC_PROVIDER_APERTURE", default_value = "NNO1")]
    aperture: String,
    #[clap(long, env = "TC_PROVIDER_BUFFER_AVAILABLE", default_value_t = 4711)]
    buffer_available: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let registry = Arc::new(EndpointRegistry::new());
    if let Some(path) = &args.authorized_endpoints {
        for endpoint in read_endpoints_file(path)? {
            info!(%endpoint, "authorizing TC endpoint");
            registry.add(endpoint).await;
        }
    }
    if registry.is_empty().await {
        info!("no TC endpoints authorized yet");
    }

    let settings = ProviderSettings {
        aperture: args.aperture.clone(),
        buffer_available: args.buffer_available,
        ..Default::default()
    };
    let provider = TcProviderService::new(
        SessionAuthorizer::new(registry.clone()),
        ProviderContext::new(settings),
    );

    let mut server = Server::builder();
    let tls_files = TlsFiles::from_options(args.ca_cert.clone(), args.cert.clone(), args.key.clone());
    if let Some(tls_files) = &tls_files {
        let credentials = tls_files.load().await?;
        server = server.tls_config(credentials.server_config())?;
        info!("mutual TLS enabled");
    }

    let admin = args
        .enable_admin
        .then(|| TcEndpointAdminServer::new(TcEndpointAdminService::new(registry.clone())));
    let reflection = if args.enable_reflection {
        Some(
            tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(cdds::FILE_DESCRIPTOR_SET)
                .build_v1()?,
        )
    } else {
        None
    };

    info!(addr = %args.addr, admin = args.enable_admin, "serving TC provider");
    server
        .add_service(TcServiceProviderServer::new(provider))
        .add_optional_service(admin)
        .add_optional_service(reflection)
        .serve_with_shutdown(args.addr, shutdown_signal())
        .await?;
    info!("TC provider stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
