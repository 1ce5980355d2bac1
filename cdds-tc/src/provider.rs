use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{async_trait, Request, Response, Status, Streaming};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    authorization::SessionAuthorizer,
    cdds::{
        aperture_id, tc::tc_service_provider_server::TcServiceProvider, ApertureId,
        ProductionState, TelecommandMessage, TelecommandReport, UplinkStatus,
    },
    command::{Command, Envelope, Report},
    endpoint::TcEndpoint,
    time::{Clock, SystemClock},
    Handle,
};

pub use crate::cdds::tc::tc_service_provider_server::TcServiceProviderServer;

pub type ReportSender = mpsc::Sender<Result<TelecommandReport, Status>>;

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Global form of the aperture stamped on every report.
    pub aperture: String,
    /// Reported as-is, no buffer accounting happens.
    pub buffer_available: u64,
    /// Outbound report channel capacity per stream.
    pub report_buffer: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            aperture: "NNO1".to_string(),
            buffer_available: 4711,
            report_buffer: 64,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SessionState {
    Open,
    Active,
    Completed,
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Open
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub received: u64,
    pub processed: u64,
    pub radiated: u64,
}

/// Provider-wide totals across every stream.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    admitted: AtomicU64,
    rejected: AtomicU64,
    commands_received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub commands_received: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ProviderMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            commands_received: self.commands_received.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

/// What every stream of one provider shares.
#[derive(Debug, Clone)]
pub struct ProviderContext<C = SystemClock> {
    settings: Arc<ProviderSettings>,
    clock: C,
    metrics: Arc<ProviderMetrics>,
}

impl ProviderContext<SystemClock> {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C> ProviderContext<C> {
    pub fn with_clock(settings: ProviderSettings, clock: C) -> Self {
        Self {
            settings: Arc::new(settings),
            clock,
            metrics: Arc::new(ProviderMetrics::default()),
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }
}

/// Per-stream state machine turning inbound commands into outbound reports.
pub struct ProviderStream<C = SystemClock> {
    endpoint: TcEndpoint,
    context: ProviderContext<C>,
    state: SessionState,
    counters: Counters,
    report_tx: Option<ReportSender>,
}

impl<C: Clock> ProviderStream<C> {
    pub fn new(endpoint: TcEndpoint, context: ProviderContext<C>, report_tx: ReportSender) -> Self {
        Self {
            endpoint,
            context,
            state: SessionState::default(),
            counters: Counters::default(),
            report_tx: Some(report_tx),
        }
    }

    pub fn endpoint(&self) -> &TcEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Drives the stream until the user half-closes it or it fails.
    pub async fn run<S>(&mut self, mut inbound: S) -> Result<Counters>
    where
        S: Stream<Item = Result<TelecommandMessage, Status>> + Unpin + Send,
    {
        while let Some(message) = inbound.next().await {
            let message = match message {
                Ok(message) => message,
                Err(status) => {
                    self.fail();
                    return Err(anyhow!("inbound TC stream failed: {}", status));
                }
            };
            debug!(
                kind = %crate::cdds::message::kind_to_string(&message),
                "received TC message"
            );
            let command = match Command::try_from(message) {
                Ok(command) => command,
                Err(e) => {
                    if let Some(report_tx) = &self.report_tx {
                        report_tx
                            .send(Err(Status::invalid_argument(e.to_string())))
                            .await
                            .ok();
                    }
                    self.fail();
                    return Err(e);
                }
            };
            if let Err(e) = self.handle(command).await {
                self.fail();
                return Err(e);
            }
        }
        self.complete();
        Ok(self.counters)
    }

    fn complete(&mut self) {
        self.state = SessionState::Completed;
        self.report_tx = None;
        ProviderMetrics::incr(&self.context.metrics.completed);
        info!(
            received = self.counters.received,
            radiated = self.counters.radiated,
            "TC stream stopped on user request"
        );
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
        self.report_tx = None;
        ProviderMetrics::incr(&self.context.metrics.failed);
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            generation_time: self.context.clock.now(),
            production_state: ProductionState::Operational,
            buffer_available: self.context.settings.buffer_available,
            aperture_id: ApertureId {
                form: Some(aperture_id::Form::GlobalForm(
                    self.context.settings.aperture.clone(),
                )),
            },
        }
    }

    async fn emit(&self, report: Report) -> Result<()> {
        let Some(report_tx) = &self.report_tx else {
            return Err(anyhow!("TC stream is already {}", self.state));
        };
        let message = report.into_message(&self.envelope());
        debug!(
            command_id = message.command_id,
            kind = %crate::cdds::report::kind_to_string(&message),
            "sending TC report"
        );
        report_tx
            .send(Ok(message))
            .await
            .map_err(|_| anyhow!("TC report receiver has gone"))
    }
}

#[async_trait]
impl<C: Clock> Handle<Command> for ProviderStream<C> {
    type Response = ();

    async fn handle(&mut self, command: Command) -> Result<Self::Response> {
        match self.state {
            SessionState::Open => self.state = SessionState::Active,
            SessionState::Active => {}
            SessionState::Completed | SessionState::Failed => {
                return Err(anyhow!("TC stream is already {}", self.state));
            }
        }
        self.counters.received += 1;
        ProviderMetrics::incr(&self.context.metrics.commands_received);

        match command {
            Command::RadiationRequest {
                command_id, frame, ..
            } => {
                info!(command_id, frame_len = frame.len(), "radiating TC");
                self.emit(Report::Ack { command_id }).await?;
                let start = self.context.clock.now();
                let stop = self.context.clock.now();
                self.emit(Report::Radiation {
                    command_id,
                    start,
                    stop,
                })
                .await?;
                self.counters.processed += 1;
                self.counters.radiated += 1;
            }
            Command::ReportRequest => {
                let Counters {
                    received,
                    processed,
                    radiated,
                } = self.counters;
                self.emit(Report::ProviderStatus {
                    uplink: UplinkStatus::Nominal,
                    received,
                    processed,
                    radiated,
                })
                .await?;
            }
        }
        Ok(())
    }
}

pub struct TcProviderService<C = SystemClock> {
    authorizer: SessionAuthorizer,
    context: ProviderContext<C>,
}

impl<C> TcProviderService<C> {
    pub fn new(authorizer: SessionAuthorizer, context: ProviderContext<C>) -> Self {
        Self {
            authorizer,
            context,
        }
    }

    pub fn metrics(&self) -> Arc<ProviderMetrics> {
        self.context.metrics.clone()
    }
}

#[async_trait]
impl<C> TcServiceProvider for TcProviderService<C>
where
    C: Clock + Clone + 'static,
{
    type OpenTelecommandStreamStream =
        stream::BoxStream<'static, Result<TelecommandReport, Status>>;

    #[tracing::instrument(skip(self, request))]
    async fn open_telecommand_stream(
        &self,
        request: Request<Streaming<TelecommandMessage>>,
    ) -> Result<Response<Self::OpenTelecommandStreamStream>, Status> {
        let endpoint = match self.authorizer.authorize(request.metadata()).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                ProviderMetrics::incr(&self.context.metrics.rejected);
                return Err(e.into());
            }
        };
        ProviderMetrics::incr(&self.context.metrics.admitted);

        let inbound = request.into_inner();
        let (report_tx, report_rx) = mpsc::channel(self.context.settings.report_buffer);
        let span = info_span!("tc_stream", endpoint = %endpoint.link);
        let mut provider_stream = ProviderStream::new(endpoint, self.context.clone(), report_tx);
        tokio::spawn(
            async move {
                if let Err(e) = provider_stream.run(inbound).await {
                    warn!("TC stream failed: {:?}", e);
                }
            }
            .instrument(span),
        );
        Ok(Response::new(Box::pin(ReceiverStream::new(report_rx))))
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;
    use crate::{
        cdds::{telecommand_report, DateTime},
        endpoint::{FrameVersion, GvcId},
    };

    #[derive(Debug, Clone)]
    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime {
            DateTime {
                days: 24_000,
                ms_of_day: 42,
                pico_secs_of_ms: 0,
            }
        }
    }

    fn provider_stream(
        capacity: usize,
    ) -> (
        ProviderStream<FixedClock>,
        mpsc::Receiver<Result<TelecommandReport, Status>>,
    ) {
        let endpoint = TcEndpoint::gvc_ids(
            "myProvider",
            "myGroundStation",
            "mySpacecraft",
            vec![GvcId::new(4711, FrameVersion::TmTcSdlp, 0)],
        );
        let context = ProviderContext::with_clock(ProviderSettings::default(), FixedClock);
        let (tx, rx) = mpsc::channel(capacity);
        (ProviderStream::new(endpoint, context, tx), rx)
    }

    fn message(command: Command) -> Result<TelecommandMessage, Status> {
        Ok(command.into())
    }

    fn inbound(
        messages: Vec<Result<TelecommandMessage, Status>>,
    ) -> impl Stream<Item = Result<TelecommandMessage, Status>> + Unpin + Send {
        futures::stream::iter(messages)
    }

    async fn drain(
        rx: mpsc::Receiver<Result<TelecommandReport, Status>>,
    ) -> Vec<Result<TelecommandReport, Status>> {
        ReceiverStream::new(rx).collect().await
    }

    #[tokio::test]
    async fn test_radiation_request_yields_ack_then_radiation() {
        let (mut provider_stream, rx) = provider_stream(16);
        assert_eq!(provider_stream.state(), SessionState::Open);
        let messages = (1..=3)
            .map(|id| message(Command::radiation(id, vec![0xc0, 0xde])))
            .collect();
        let counters = provider_stream.run(inbound(messages)).await.unwrap();
        assert_eq!(provider_stream.state(), SessionState::Completed);
        assert_eq!(
            counters,
            Counters {
                received: 3,
                processed: 3,
                radiated: 3
            }
        );

        let reports = drain(rx).await;
        assert_eq!(reports.len(), 6);
        for (i, pair) in reports.chunks(2).enumerate() {
            let id = i as u64 + 1;
            let ack = pair[0].as_ref().unwrap();
            let radiation = pair[1].as_ref().unwrap();
            assert_eq!(Report::try_from(ack).unwrap(), Report::Ack { command_id: id });
            assert_eq!(radiation.command_id, id);
            assert!(matches!(
                radiation.report,
                Some(telecommand_report::Report::Radiation(_))
            ));
            assert_eq!(ack.production_state(), ProductionState::Operational);
            assert_eq!(ack.buffer_available, 4711);
            assert_eq!(
                ack.aperture_id,
                Some(ApertureId {
                    form: Some(aperture_id::Form::GlobalForm("NNO1".to_string()))
                })
            );
        }
    }

    #[tokio::test]
    async fn test_report_request_reports_counters() {
        let (mut provider_stream, rx) = provider_stream(16);
        let messages = vec![
            message(Command::ReportRequest),
            message(Command::radiation(10, vec![])),
            message(Command::radiation(11, vec![])),
            message(Command::ReportRequest),
        ];
        provider_stream.run(inbound(messages)).await.unwrap();

        let reports = drain(rx)
            .await
            .into_iter()
            .map(|r| Report::try_from(&r.unwrap()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(reports.len(), 6);
        assert_eq!(
            reports[0],
            Report::ProviderStatus {
                uplink: UplinkStatus::Nominal,
                received: 1,
                processed: 0,
                radiated: 0,
            }
        );
        assert_eq!(
            reports[5],
            Report::ProviderStatus {
                uplink: UplinkStatus::Nominal,
                received: 4,
                processed: 2,
                radiated: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_empty_message_fails_stream() {
        let (mut provider_stream, rx) = provider_stream(16);
        let messages = vec![
            message(Command::radiation(1, vec![])),
            Ok(TelecommandMessage { message: None }),
            message(Command::radiation(2, vec![])),
        ];
        assert!(provider_stream.run(inbound(messages)).await.is_err());
        assert_eq!(provider_stream.state(), SessionState::Failed);

        let reports = drain(rx).await;
        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports[2].as_ref().unwrap_err().code(),
            Code::InvalidArgument
        );
        assert_eq!(provider_stream.counters().received, 1);
    }

    #[tokio::test]
    async fn test_inbound_error_fails_without_reports() {
        let (mut provider_stream, rx) = provider_stream(16);
        let messages = vec![Err(Status::unavailable("connection reset"))];
        assert!(provider_stream.run(inbound(messages)).await.is_err());
        assert_eq!(provider_stream.state(), SessionState::Failed);
        assert!(drain(rx).await.is_empty());
        assert_eq!(provider_stream.context.metrics.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_gone_receiver_fails_stream() {
        let (mut provider_stream, rx) = provider_stream(1);
        drop(rx);
        let messages = vec![message(Command::radiation(1, vec![]))];
        assert!(provider_stream.run(inbound(messages)).await.is_err());
        assert_eq!(provider_stream.state(), SessionState::Failed);
        assert_eq!(provider_stream.counters().processed, 0);
    }

    #[tokio::test]
    async fn test_handle_after_completion_is_refused() {
        let (mut provider_stream, _rx) = provider_stream(4);
        provider_stream.run(inbound(vec![])).await.unwrap();
        assert_eq!(provider_stream.state(), SessionState::Completed);
        assert!(provider_stream.handle(Command::ReportRequest).await.is_err());
        assert_eq!(provider_stream.counters(), Counters::default());
    }
}
