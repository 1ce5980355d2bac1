use anyhow::{anyhow, Result};

use crate::cdds::{
    telecommand_message, telecommand_report, DateTime, RadiationReportRequest,
    TelecommandMessage, TelecommandProviderStatus, TelecommandRadiation,
    TelecommandRadiationRequest, TelecommandRadiationRequestAck, TelecommandReport,
    TelecommandReportRequest, UplinkStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RadiationRequest {
        command_id: u64,
        produce_report: bool,
        frame: Vec<u8>,
    },
    ReportRequest,
}

impl Command {
    pub fn radiation(command_id: u64, frame: impl Into<Vec<u8>>) -> Self {
        Self::RadiationRequest {
            command_id,
            produce_report: true,
            frame: frame.into(),
        }
    }
}

impl TryFrom<TelecommandMessage> for Command {
    type Error = anyhow::Error;

    fn try_from(message: TelecommandMessage) -> Result<Self> {
        match message.message {
            Some(telecommand_message::Message::RadiationRequest(request)) => {
                let produce_report =
                    request.report_request() == RadiationReportRequest::ProduceReport;
                Ok(Self::RadiationRequest {
                    command_id: request.command_id,
                    produce_report,
                    frame: request.telecommand_frame,
                })
            }
            Some(telecommand_message::Message::ReportRequest(_)) => Ok(Self::ReportRequest),
            None => Err(anyhow!("telecommand message carries no command")),
        }
    }
}

impl From<Command> for TelecommandMessage {
    fn from(command: Command) -> Self {
        let message = match command {
            Command::RadiationRequest {
                command_id,
                produce_report,
                frame,
            } => {
                let report_request = if produce_report {
                    RadiationReportRequest::ProduceReport
                } else {
                    RadiationReportRequest::NoReport
                };
                telecommand_message::Message::RadiationRequest(TelecommandRadiationRequest {
                    command_id,
                    report_request: report_request.into(),
                    telecommand_frame: frame,
                })
            }
            Command::ReportRequest => {
                telecommand_message::Message::ReportRequest(TelecommandReportRequest {})
            }
        };
        TelecommandMessage {
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Ack {
        command_id: u64,
    },
    Radiation {
        command_id: u64,
        start: DateTime,
        stop: DateTime,
    },
    ProviderStatus {
        uplink: UplinkStatus,
        received: u64,
        processed: u64,
        radiated: u64,
    },
}

impl Report {
    pub fn command_id(&self) -> Option<u64> {
        match self {
            Self::Ack { command_id } | Self::Radiation { command_id, .. } => Some(*command_id),
            Self::ProviderStatus { .. } => None,
        }
    }

    /// Wraps the report into its wire envelope.
    ///
    /// Provider status reports are not bound to a command and carry id 0.
    pub fn into_message(self, envelope: &Envelope) -> TelecommandReport {
        let command_id = self.command_id().unwrap_or_default();
        let report = match self {
            Self::Ack { .. } => telecommand_report::Report::Ack(TelecommandRadiationRequestAck {}),
            Self::Radiation { start, stop, .. } => {
                telecommand_report::Report::Radiation(TelecommandRadiation {
                    radiation_start_time: Some(start),
                    radiation_stop_time: Some(stop),
                })
            }
            Self::ProviderStatus {
                uplink,
                received,
                processed,
                radiated,
            } => telecommand_report::Report::ProviderStatus(TelecommandProviderStatus {
                uplink_status: uplink.into(),
                number_of_telecommands_received: received,
                number_of_telecommands_processed: processed,
                number_of_telecommands_radiated: radiated,
            }),
        };
        TelecommandReport {
            command_id,
            production_state: envelope.production_state.into(),
            buffer_available: envelope.buffer_available,
            report_generation_time: Some(envelope.generation_time.clone()),
            aperture_id: Some(envelope.aperture_id.clone()),
            report: Some(report),
        }
    }
}

impl TryFrom<&TelecommandReport> for Report {
    type Error = anyhow::Error;

    fn try_from(message: &TelecommandReport) -> Result<Self> {
        let command_id = message.command_id;
        match &message.report {
            Some(telecommand_report::Report::Ack(_)) => Ok(Self::Ack { command_id }),
            Some(telecommand_report::Report::Radiation(radiation)) => Ok(Self::Radiation {
                command_id,
                start: radiation
                    .radiation_start_time
                    .clone()
                    .ok_or_else(|| anyhow!("radiation report without start time"))?,
                stop: radiation
                    .radiation_stop_time
                    .clone()
                    .ok_or_else(|| anyhow!("radiation report without stop time"))?,
            }),
            Some(telecommand_report::Report::ProviderStatus(status)) => Ok(Self::ProviderStatus {
                uplink: status.uplink_status(),
                received: status.number_of_telecommands_received,
                processed: status.number_of_telecommands_processed,
                radiated: status.number_of_telecommands_radiated,
            }),
            None => Err(anyhow!("telecommand report carries no report")),
        }
    }
}

/// Fields stamped on every outgoing report.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub generation_time: DateTime,
    pub production_state: crate::cdds::ProductionState,
    pub buffer_available: u64,
    pub aperture_id: crate::cdds::ApertureId,
}
