use std::{sync::Arc, time::Duration};

use anyhow::Result;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    transport::{Channel, ClientTlsConfig},
    Code, Request, Status, Streaming,
};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    authorization::attach_endpoint,
    cdds::{
        tc::tc_service_provider_client::TcServiceProviderClient, TelecommandMessage,
        TelecommandReport,
    },
    command::Command,
    endpoint::{CodecError, TcEndpoint},
    Hook, PassThrough,
};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TC stream was rejected: {}", .0.message())]
    Rejected(Status),
    #[error("TC stream failed: {0}")]
    Transport(Status),
    #[error(transparent)]
    Endpoint(#[from] CodecError),
    #[error("received {observed} of {expected} TC reports within {timeout:?}")]
    DeadlineExceeded {
        expected: usize,
        observed: usize,
        timeout: Duration,
    },
    #[error("TC stream ended after {observed} of {expected} reports")]
    StreamEnded { expected: usize, observed: usize },
    #[error("TC session has been stopped")]
    Stopped,
}

impl SessionError {
    fn from_status(status: Status) -> Self {
        match status.code() {
            Code::PermissionDenied => Self::Rejected(status),
            _ => Self::Transport(status),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed,
    Failed(Status),
}

#[derive(Debug, Default)]
struct Observed {
    count: usize,
    outcome: Option<Outcome>,
}

/// Client side of the TC service.
#[derive(Clone)]
pub struct TcServiceUser {
    client: TcServiceProviderClient<Channel>,
}

impl TcServiceUser {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: TcServiceProviderClient::new(channel),
        }
    }

    pub async fn connect(uri: impl Into<String>, tls: Option<ClientTlsConfig>) -> Result<Self> {
        let mut endpoint = Channel::from_shared(uri.into())?;
        if let Some(tls) = tls {
            endpoint = endpoint.tls_config(tls)?;
        }
        let channel = endpoint.connect().await?;
        Ok(Self::new(channel))
    }

    pub async fn open(&self, endpoint: &TcEndpoint) -> Result<UserSession, SessionError> {
        self.open_with_hook(endpoint, PassThrough).await
    }

    /// Opens a TC stream, passing every received report through `hook`.
    ///
    /// Fails with [`SessionError::Rejected`] if the provider refuses the endpoint.
    pub async fn open_with_hook<H>(
        &self,
        endpoint: &TcEndpoint,
        hook: H,
    ) -> Result<UserSession, SessionError>
    where
        H: Hook<Arc<TelecommandReport>, Output = Arc<TelecommandReport>> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let mut request = Request::new(ReceiverStream::new(command_rx));
        attach_endpoint(request.metadata_mut(), endpoint)?;

        let mut client = self.client.clone();
        let response = client
            .open_telecommand_stream(request)
            .await
            .map_err(SessionError::from_status)?;
        info!(%endpoint, "opened TC stream");

        let (observed_tx, observed_rx) = watch::channel(Observed::default());
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let span = info_span!("tc_session", endpoint = %endpoint.link);
        let receiver = tokio::spawn(
            receive_reports(response.into_inner(), observed_tx, pending_tx, hook)
                .instrument(span),
        );
        Ok(UserSession {
            command_tx: Some(command_tx),
            observed: observed_rx,
            pending: pending_rx,
            receiver,
        })
    }
}

async fn receive_reports<H>(
    mut inbound: Streaming<TelecommandReport>,
    observed: watch::Sender<Observed>,
    pending: mpsc::UnboundedSender<Arc<TelecommandReport>>,
    mut hook: H,
) where
    H: Hook<Arc<TelecommandReport>, Output = Arc<TelecommandReport>>,
{
    let outcome = loop {
        match inbound.message().await {
            Ok(Some(report)) => {
                let report = Arc::new(report);
                let report = match hook.hook(report.clone()).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("TC report hook failed: {:?}", e);
                        report
                    }
                };
                // queued before counted, so a woken waiter can take it
                let _ = pending.send(report);
                observed.send_modify(|observed| observed.count += 1);
            }
            Ok(None) => {
                info!("TC stream completed");
                break Outcome::Completed;
            }
            Err(status) => {
                warn!(code = ?status.code(), "TC stream failed: {}", status.message());
                break Outcome::Failed(status);
            }
        }
    };
    observed.send_modify(|observed| observed.outcome = Some(outcome));
}

/// An open TC stream as seen by the user.
///
/// Reports keep being counted after [`UserSession::stop`] until the provider
/// closes its side. Received reports are queued until
/// [`UserSession::take_reports`] drains them.
pub struct UserSession {
    command_tx: Option<mpsc::Sender<TelecommandMessage>>,
    observed: watch::Receiver<Observed>,
    pending: mpsc::UnboundedReceiver<Arc<TelecommandReport>>,
    receiver: JoinHandle<()>,
}

impl UserSession {
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        let command_tx = self.command_tx.as_ref().ok_or(SessionError::Stopped)?;
        if command_tx.send(command.into()).await.is_err() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> SessionError {
        match &self.observed.borrow().outcome {
            Some(Outcome::Failed(status)) => SessionError::from_status(status.clone()),
            _ => SessionError::Stopped,
        }
    }

    /// Number of reports received so far, drained ones included.
    pub fn report_count(&self) -> usize {
        self.observed.borrow().count
    }

    /// Drains the reports received since the last call, in arrival order.
    pub fn take_reports(&mut self) -> Vec<Arc<TelecommandReport>> {
        let mut reports = vec![];
        while let Ok(report) = self.pending.try_recv() {
            reports.push(report);
        }
        reports
    }

    pub fn is_finished(&self) -> bool {
        self.observed.borrow().outcome.is_some()
    }

    /// Waits until at least `expected` reports were received.
    ///
    /// Returns early with an error if the stream ends or fails short of
    /// `expected`.
    pub async fn wait_for_reports(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<usize, SessionError> {
        let mut observed = self.observed.clone();
        let wait = observed.wait_for(|o| o.count >= expected || o.outcome.is_some());
        let (count, outcome) = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(o)) => (o.count, o.outcome.clone()),
            // the receive task always records an outcome before it exits
            Ok(Err(_)) => {
                let o = self.observed.borrow();
                (o.count, o.outcome.clone())
            }
            Err(_) => {
                return Err(SessionError::DeadlineExceeded {
                    expected,
                    observed: self.report_count(),
                    timeout,
                });
            }
        };
        if count >= expected {
            return Ok(count);
        }
        match outcome {
            Some(Outcome::Failed(status)) => Err(SessionError::from_status(status)),
            _ => Err(SessionError::StreamEnded {
                expected,
                observed: count,
            }),
        }
    }

    /// Half-closes the stream. Already sent commands are still answered.
    pub fn stop(&mut self) {
        if self.command_tx.take().is_some() {
            info!("stopping TC stream");
        }
    }

    /// Half-closes the stream and waits for the provider to close its side.
    pub async fn finish(mut self) -> Result<usize, SessionError> {
        self.stop();
        if let Err(e) = (&mut self.receiver).await {
            error!("TC report receiver panicked: {:?}", e);
        }
        let observed = self.observed.borrow();
        match &observed.outcome {
            Some(Outcome::Failed(status)) => Err(SessionError::from_status(status.clone())),
            _ => Ok(observed.count),
        }
    }
}
