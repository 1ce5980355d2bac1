use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use cdds_tc::{
    cdds::{report, TelecommandReport},
    command::{Command, Report},
    endpoint::{read_endpoint_file, TcEndpoint},
    recorder::ReportRecorder,
    time,
    tls::TlsFiles,
    user::TcServiceUser,
    Hook, PassThrough,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    #[clap(long, env = "TC_PROVIDER_URI", default_value = "http://localhost:6666")]
    provider: String,
    #[clap(long, env = "TC_USER_CA_CERT", requires_all = ["cert", "key"])]
    ca_cert: Option<PathBuf>,
    #[clap(long, env = "TC_USER_CERT", requires_all = ["ca_cert", "key"])]
    cert: Option<PathBuf>,
    #[clap(long, env = "TC_USER_KEY", requires_all = ["ca_cert", "cert"])]
    key: Option<PathBuf>,
    /// Server name to verify the provider certificate against
    #[clap(long, env = "TC_USER_DOMAIN", default_value = "localhost")]
    domain: String,
    /// JSON file describing the endpoint to present
    #[clap(long, env = "TC_USER_ENDPOINT")]
    endpoint: PathBuf,
    /// Number of radiation requests to send
    #[clap(long, default_value_t = 1)]
    count: u64,
    /// Ask for a provider status report after the radiation requests
    #[clap(long)]
    report_request: bool,
    #[clap(long, default_value = "Hello TC provider")]
    frame: String,
    #[clap(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Append every received report to this message log
    #[clap(long)]
    record: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let endpoint = read_endpoint_file(&args.endpoint)?;

    let tls = match TlsFiles::from_options(args.ca_cert.clone(), args.cert.clone(), args.key.clone()) {
        Some(files) => Some(files.load().await?.client_config(args.domain.clone())),
        None => None,
    };
    let user = TcServiceUser::connect(args.provider.clone(), tls).await?;

    match &args.record {
        Some(path) => run(&args, &user, &endpoint, ReportRecorder::append(path).await?).await,
        None => run(&args, &user, &endpoint, PassThrough).await,
    }
}

async fn run<H>(args: &Args, user: &TcServiceUser, endpoint: &TcEndpoint, hook: H) -> Result<()>
where
    H: Hook<Arc<TelecommandReport>, Output = Arc<TelecommandReport>> + Send + 'static,
{
    let mut session = user.open_with_hook(endpoint, hook).await?;
    for command_id in 1..=args.count {
        session
            .send(Command::radiation(command_id, args.frame.as_bytes()))
            .await?;
    }
    if args.report_request {
        session.send(Command::ReportRequest).await?;
    }

    let expected = usize::try_from(args.count)? * 2 + usize::from(args.report_request);
    let received = session
        .wait_for_reports(expected, Duration::from_millis(args.timeout_ms))
        .await?;
    for message in session.take_reports() {
        print_report(&message)?;
    }
    info!(received, "done");

    let total = session.finish().await?;
    if total < expected {
        return Err(anyhow!("expected {} TC reports, got {}", expected, total));
    }
    Ok(())
}

fn print_report(message: &TelecommandReport) -> Result<()> {
    let generated = message
        .report_generation_time
        .as_ref()
        .map(time::format)
        .unwrap_or_default();
    match Report::try_from(message)? {
        Report::Radiation {
            command_id,
            start,
            stop,
        } => info!(
            command_id,
            start = %time::format(&start),
            stop = %time::format(&stop),
            %generated,
            "RADIATION"
        ),
        Report::ProviderStatus {
            uplink,
            received,
            processed,
            radiated,
        } => info!(
            uplink = ?uplink,
            received,
            processed,
            radiated,
            %generated,
            "PROVIDER_STATUS"
        ),
        Report::Ack { command_id } => info!(
            command_id,
            %generated,
            "{}",
            report::kind_to_string(message)
        ),
    }
    Ok(())
}
