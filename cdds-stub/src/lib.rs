pub mod cdds {
    tonic::include_proto!("ccsds.cdds");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("cdds_descriptor");

    pub mod tc {
        tonic::include_proto!("ccsds.cdds.tc");

        pub mod admin {
            tonic::include_proto!("ccsds.cdds.tc.admin");
        }
    }

    pub mod report {
        use super::{telecommand_report, TelecommandReport};

        pub fn kind_to_string(report: &TelecommandReport) -> String {
            match report.report {
                Some(telecommand_report::Report::Ack(_)) => "ACK".to_string(),
                Some(telecommand_report::Report::Radiation(_)) => "RADIATION".to_string(),
                Some(telecommand_report::Report::ProviderStatus(_)) => {
                    "PROVIDER_STATUS".to_string()
                }
                None => "EMPTY".to_string(),
            }
        }
    }

    pub mod message {
        use super::{telecommand_message, TelecommandMessage};

        pub fn kind_to_string(message: &TelecommandMessage) -> String {
            match message.message {
                Some(telecommand_message::Message::RadiationRequest(_)) => {
                    "RADIATION_REQUEST".to_string()
                }
                Some(telecommand_message::Message::ReportRequest(_)) => {
                    "REPORT_REQUEST".to_string()
                }
                None => "EMPTY".to_string(),
            }
        }
    }
}
