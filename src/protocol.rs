//! Wire messages exchanged with a trunking system
//!
//! Every frame is a JSON text message `{"type": <packet type>, "data": {...}}`.
//! Outbound messages are built from typed structs; inbound frames are parsed
//! into [`InboundMessage`].

use crate::error::{ConsoleError, Result};
use crate::types::{RadioId, ResponseType, SiteId, TalkgroupId, VoiceChannel};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Packet type codes
pub mod packet_type {
    pub const AUDIO_DATA: u8 = 0x01;
    pub const GRP_AFF_REQ: u8 = 0x02;
    pub const GRP_AFF_RSP: u8 = 0x03;
    pub const GRP_VCH_REQ: u8 = 0x05;
    pub const GRP_VCH_RLS: u8 = 0x06;
    pub const GRP_VCH_RSP: u8 = 0x07;
    pub const U_REG_REQ: u8 = 0x08;
    pub const U_REG_RSP: u8 = 0x09;
}

/// Frame envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub packet_type: u8,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnitRegistrationRequest {
    pub src_id: RadioId,
    pub site: SiteId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupAffiliationRequest {
    pub src_id: RadioId,
    pub dst_id: TalkgroupId,
    pub site: SiteId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceChannelRequest {
    pub src_id: RadioId,
    pub dst_id: TalkgroupId,
    pub site: SiteId,
}

/// Release of a voice channel, sent by us or announced by the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceChannelRelease {
    pub src_id: RadioId,
    pub dst_id: TalkgroupId,
    #[serde(default)]
    pub channel: Option<VoiceChannel>,
    #[serde(default)]
    pub site: SiteId,
}

/// Source/destination/frequency triple tagging an audio frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceTag {
    pub src_id: RadioId,
    pub dst_id: TalkgroupId,
    pub frequency: VoiceChannel,
}

/// A block of PCM audio bound to a voice channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioFrame {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub voice_channel: VoiceTag,
    #[serde(default)]
    pub site: SiteId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnitRegistrationResponse {
    pub status: ResponseType,
    #[serde(default)]
    pub src_id: Option<RadioId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupAffiliationResponse {
    pub status: ResponseType,
    #[serde(default)]
    pub src_id: Option<RadioId>,
    #[serde(default)]
    pub dst_id: Option<TalkgroupId>,
}

/// Voice grant event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceChannelResponse {
    pub status: ResponseType,
    pub src_id: RadioId,
    pub dst_id: TalkgroupId,
    #[serde(default)]
    pub channel: Option<VoiceChannel>,
}

/// Messages the console sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    UnitRegistration(UnitRegistrationRequest),
    GroupAffiliation(GroupAffiliationRequest),
    VoiceChannelRequest(VoiceChannelRequest),
    VoiceChannelRelease(VoiceChannelRelease),
    Audio(AudioFrame),
}

impl OutboundMessage {
    pub fn unit_registration(rid: RadioId, site: SiteId) -> Self {
        OutboundMessage::UnitRegistration(UnitRegistrationRequest { src_id: rid, site })
    }

    pub fn group_affiliation(rid: RadioId, tgid: TalkgroupId, site: SiteId) -> Self {
        OutboundMessage::GroupAffiliation(GroupAffiliationRequest {
            src_id: rid,
            dst_id: tgid,
            site,
        })
    }

    pub fn voice_channel_request(rid: RadioId, tgid: TalkgroupId, site: SiteId) -> Self {
        OutboundMessage::VoiceChannelRequest(VoiceChannelRequest {
            src_id: rid,
            dst_id: tgid,
            site,
        })
    }

    pub fn voice_channel_release(
        rid: RadioId,
        tgid: TalkgroupId,
        channel: Option<VoiceChannel>,
        site: SiteId,
    ) -> Self {
        OutboundMessage::VoiceChannelRelease(VoiceChannelRelease {
            src_id: rid,
            dst_id: tgid,
            channel,
            site,
        })
    }

    pub fn voice_frame(
        rid: RadioId,
        tgid: TalkgroupId,
        channel: VoiceChannel,
        samples: Vec<u8>,
        site: SiteId,
    ) -> Self {
        OutboundMessage::Audio(AudioFrame {
            data: samples,
            voice_channel: VoiceTag {
                src_id: rid,
                dst_id: tgid,
                frequency: channel,
            },
            site,
        })
    }

    pub fn packet_type(&self) -> u8 {
        match self {
            OutboundMessage::UnitRegistration(_) => packet_type::U_REG_REQ,
            OutboundMessage::GroupAffiliation(_) => packet_type::GRP_AFF_REQ,
            OutboundMessage::VoiceChannelRequest(_) => packet_type::GRP_VCH_REQ,
            OutboundMessage::VoiceChannelRelease(_) => packet_type::GRP_VCH_RLS,
            OutboundMessage::Audio(_) => packet_type::AUDIO_DATA,
        }
    }

    fn data(&self) -> serde_json::Result<Value> {
        match self {
            OutboundMessage::UnitRegistration(m) => serde_json::to_value(m),
            OutboundMessage::GroupAffiliation(m) => serde_json::to_value(m),
            OutboundMessage::VoiceChannelRequest(m) => serde_json::to_value(m),
            OutboundMessage::VoiceChannelRelease(m) => serde_json::to_value(m),
            OutboundMessage::Audio(m) => serde_json::to_value(m),
        }
    }
}

/// Messages the console receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    UnitRegistrationResponse(UnitRegistrationResponse),
    GroupAffiliationResponse(GroupAffiliationResponse),
    VoiceChannelResponse(VoiceChannelResponse),
    VoiceChannelRelease(VoiceChannelRelease),
    Audio(AudioFrame),
    /// A well-formed frame of a type this console does not act on
    Unhandled(u8),
}

/// Encode an outbound message into a text frame
pub fn encode(message: &OutboundMessage) -> Result<String> {
    let envelope = Envelope {
        packet_type: message.packet_type(),
        data: message.data()?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode an inbound text frame
///
/// # Errors
///
/// Returns [`ConsoleError::Decode`] if the frame is not valid JSON or its data
/// does not match the packet type.
pub fn decode(text: &str) -> Result<InboundMessage> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| ConsoleError::Decode(format!("bad envelope: {}", e)))?;

    fn data<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T> {
        serde_json::from_value(value).map_err(|e| ConsoleError::Decode(format!("{}: {}", kind, e)))
    }

    let message = match envelope.packet_type {
        packet_type::U_REG_RSP => {
            InboundMessage::UnitRegistrationResponse(data(envelope.data, "U_REG_RSP")?)
        }
        packet_type::GRP_AFF_RSP => {
            InboundMessage::GroupAffiliationResponse(data(envelope.data, "GRP_AFF_RSP")?)
        }
        packet_type::GRP_VCH_RSP => {
            InboundMessage::VoiceChannelResponse(data(envelope.data, "GRP_VCH_RSP")?)
        }
        packet_type::GRP_VCH_RLS => {
            InboundMessage::VoiceChannelRelease(data(envelope.data, "GRP_VCH_RLS")?)
        }
        packet_type::AUDIO_DATA => InboundMessage::Audio(data(envelope.data, "AUDIO_DATA")?),
        other => InboundMessage::Unhandled(other),
    };
    Ok(message)
}

mod base64_bytes {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
