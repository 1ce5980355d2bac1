use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tokio::{fs::File, io::{AsyncWrite, BufWriter}};
use tracing::error;

use crate::{cdds::TelecommandReport, log_file::MessageLogWriter, Hook};

/// Records every TC report passing through into a message log.
pub struct ReportRecorder<W> {
    writer: MessageLogWriter<W>,
}

impl ReportRecorder<BufWriter<File>> {
    pub async fn append(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(MessageLogWriter::append(path).await?))
    }
}

impl<W: AsyncWrite + Unpin> ReportRecorder<W> {
    pub fn new(writer: MessageLogWriter<W>) -> Self {
        Self { writer }
    }

    async fn record(&mut self, report: &TelecommandReport) -> Result<()> {
        self.writer.write(report).await?;
        self.writer.flush().await
    }
}

#[async_trait]
impl<W> Hook<Arc<TelecommandReport>> for ReportRecorder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    type Output = Arc<TelecommandReport>;

    async fn hook(&mut self, report: Arc<TelecommandReport>) -> Result<Self::Output> {
        if let Err(e) = self.record(&report).await {
            error!("failed to record TC report: {}", e);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cdds::{telecommand_report, TelecommandRadiationRequestAck},
        log_file::MessageLogReader,
    };

    #[tokio::test]
    async fn test_records_reports_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.log");
        let mut recorder = ReportRecorder::append(&path).await.unwrap();
        for command_id in 1..=3 {
            let report = Arc::new(TelecommandReport {
                command_id,
                report: Some(telecommand_report::Report::Ack(
                    TelecommandRadiationRequestAck {},
                )),
                ..Default::default()
            });
            let passed = recorder.hook(report.clone()).await.unwrap();
            assert!(Arc::ptr_eq(&passed, &report));
        }

        let mut reader = MessageLogReader::open(&path).await.unwrap();
        let ids = reader
            .read_all::<TelecommandReport>()
            .await
            .unwrap()
            .iter()
            .map(|r| r.command_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
