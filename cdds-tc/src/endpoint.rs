use std::{fmt, path::Path};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed TC endpoint: {0}")]
pub struct CodecError(#[from] serde_json::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameVersion {
    TmTcSdlp,
    AosSdlp,
    Uslp,
}

impl Default for FrameVersion {
    fn default() -> Self {
        Self::TmTcSdlp
    }
}

impl fmt::Display for FrameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TmTcSdlp => write!(f, "TM_TC_SDLP"),
            Self::AosSdlp => write!(f, "AOS_SDLP"),
            Self::Uslp => write!(f, "USLP"),
        }
    }
}

/// Global virtual channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GvcId {
    pub spacecraft_id: u32,
    #[serde(default)]
    pub version: FrameVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_channel_id: Option<u32>,
}

impl GvcId {
    pub fn new(spacecraft_id: u32, version: FrameVersion, virtual_channel_id: u32) -> Self {
        Self {
            spacecraft_id,
            version,
            virtual_channel_id: Some(virtual_channel_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GvcIdList {
    #[serde(default)]
    pub gvc_id: Vec<GvcId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cltu {}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcLink {
    GvcIds(GvcIdList),
    Cltu(Cltu),
}

impl fmt::Display for TcLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GvcIds(list) if list.gvc_id.is_empty() => write!(f, "no-gvcid"),
            Self::GvcIds(list) => {
                for (i, gvc_id) in list.gvc_id.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(
                        f,
                        "sc={}.frame-version={}",
                        gvc_id.spacecraft_id, gvc_id.version
                    )?;
                    if let Some(vc) = gvc_id.virtual_channel_id {
                        write!(f, ".vc={}", vc)?;
                    }
                }
                Ok(())
            }
            Self::Cltu(_) => write!(f, "cltu"),
        }
    }
}

/// Identifies a provider/terminal/spacecraft command relationship.
///
/// Equality is structural and is the only key the registry authorizes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTcEndpoint")]
pub struct TcEndpoint {
    pub service_provider: String,
    pub terminal: String,
    pub service_user: String,
    #[serde(flatten)]
    pub link: TcLink,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<u32>,
}

/// Wire shape of [`TcEndpoint`], with both links optional.
#[derive(Deserialize)]
struct RawTcEndpoint {
    #[serde(default)]
    service_provider: String,
    #[serde(default)]
    terminal: String,
    #[serde(default)]
    service_user: String,
    #[serde(default)]
    gvc_ids: Option<GvcIdList>,
    #[serde(default)]
    cltu: Option<Cltu>,
    #[serde(default)]
    service_version: Option<u32>,
}

impl TryFrom<RawTcEndpoint> for TcEndpoint {
    type Error = &'static str;

    fn try_from(raw: RawTcEndpoint) -> Result<Self, Self::Error> {
        let link = match (raw.gvc_ids, raw.cltu) {
            (Some(list), None) => TcLink::GvcIds(list),
            (None, Some(cltu)) => TcLink::Cltu(cltu),
            (None, None) => return Err("one of gvc_ids or cltu is required"),
            (Some(_), Some(_)) => return Err("gvc_ids and cltu are mutually exclusive"),
        };
        Ok(Self {
            service_provider: raw.service_provider,
            terminal: raw.terminal,
            service_user: raw.service_user,
            link,
            service_version: raw.service_version,
        })
    }
}

impl TcEndpoint {
    pub fn gvc_ids(
        service_provider: impl Into<String>,
        terminal: impl Into<String>,
        service_user: impl Into<String>,
        gvc_id: Vec<GvcId>,
    ) -> Self {
        Self {
            service_provider: service_provider.into(),
            terminal: terminal.into(),
            service_user: service_user.into(),
            link: TcLink::GvcIds(GvcIdList { gvc_id }),
            service_version: None,
        }
    }

    pub fn cltu(
        service_provider: impl Into<String>,
        terminal: impl Into<String>,
        service_user: impl Into<String>,
    ) -> Self {
        Self {
            service_provider: service_provider.into(),
            terminal: terminal.into(),
            service_user: service_user.into(),
            link: TcLink::Cltu(Cltu {}),
            service_version: None,
        }
    }

    pub fn with_service_version(self, service_version: u32) -> Self {
        Self {
            service_version: Some(service_version),
            ..self
        }
    }
}

impl fmt::Display for TcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} [{}]",
            self.service_provider, self.terminal, self.service_user, self.link
        )
    }
}

pub fn encode(endpoint: &TcEndpoint) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(endpoint)?)
}

pub fn decode(bytes: &[u8]) -> Result<TcEndpoint, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn read_endpoint_file(path: impl AsRef<Path>) -> Result<TcEndpoint> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("failed to read TC endpoint file {}: {}", path.display(), e))?;
    decode(&bytes).map_err(|e| anyhow!("{}: {}", path.display(), e))
}

/// Reads a JSON array of endpoints, as used for the authorized endpoint list.
pub fn read_endpoints_file(path: impl AsRef<Path>) -> Result<Vec<TcEndpoint>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow!("failed to read TC endpoint file {}: {}", path.display(), e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| anyhow!("malformed TC endpoint list in {}: {}", path.display(), e))
}
