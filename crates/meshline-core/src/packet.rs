//! Packet wire codec
//!
//! Every packet on a transport link has a fixed 7-byte header followed by
//! the payload:
//!
//! ```text
//! +------+-----------------+-------------+-------------------+
//! | type | route id (u32)  | size (u16)  | payload[size]     |
//! +------+-----------------+-------------+-------------------+
//!   1 B         4 B BE          2 B BE
//! ```
//!
//! The declared size must match the payload exactly. A frame violating this
//! is rejected with [`ProtocolError::SizeMismatch`], never truncated or
//! padded.

use std::fmt::Display;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::routing::RouteId;

/// Size of the packet header in bytes
pub const PACKET_HEADER_SIZE: usize = 7;

/// Largest payload a single packet can carry
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Type of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Close = 1,
    KeepAlive = 2,
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Data => "Data",
            PacketType::Close => "Close",
            PacketType::KeepAlive => "KeepAlive",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Close),
            2 => Ok(PacketType::KeepAlive),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a route group was closed, carried by Close packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseCode {
    /// The application finished with the flow
    Finished,
    /// The peer stopped sending keep-alives
    KeepAliveTimeout,
    /// A route along the path went away
    RouteClosed,
    /// A code this node does not know
    Other(u8),
}

impl From<u8> for CloseCode {
    fn from(code: u8) -> Self {
        match code {
            0 => CloseCode::Finished,
            1 => CloseCode::KeepAliveTimeout,
            2 => CloseCode::RouteClosed,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u8 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Finished => 0,
            CloseCode::KeepAliveTimeout => 1,
            CloseCode::RouteClosed => 2,
            CloseCode::Other(other) => other,
        }
    }
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseCode::Finished => f.write_str("finished"),
            CloseCode::KeepAliveTimeout => f.write_str("keep-alive timeout"),
            CloseCode::RouteClosed => f.write_str("route closed"),
            CloseCode::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// A packet travelling over a transport link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    route_id: RouteId,
    payload: Bytes,
}

impl Packet {
    /// Create a packet, rejecting payloads above [`MAX_PAYLOAD_SIZE`]
    pub fn new(
        packet_type: PacketType,
        route_id: RouteId,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            packet_type,
            route_id,
            payload,
        })
    }

    /// Create a data packet
    pub fn data(route_id: RouteId, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::new(PacketType::Data, route_id, payload)
    }

    /// Create a close packet carrying a single close-code byte
    pub fn close(route_id: RouteId, code: CloseCode) -> Self {
        Self {
            packet_type: PacketType::Close,
            route_id,
            payload: Bytes::copy_from_slice(&[u8::from(code)]),
        }
    }

    /// Create an empty keep-alive packet
    pub fn keep_alive(route_id: RouteId) -> Self {
        Self {
            packet_type: PacketType::KeepAlive,
            route_id,
            payload: Bytes::new(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the packet, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Declared payload size
    pub fn size(&self) -> u16 {
        // Bounded by MAX_PAYLOAD_SIZE at construction.
        self.payload.len() as u16
    }

    /// Close code of a close packet
    pub fn close_code(&self) -> Result<CloseCode, ProtocolError> {
        if self.packet_type != PacketType::Close {
            return Err(ProtocolError::UnexpectedPacketType {
                expected: PacketType::Close.as_str(),
                actual: self.packet_type.as_str(),
            });
        }

        self.payload
            .first()
            .map(|b| CloseCode::from(*b))
            .ok_or(ProtocolError::MissingCloseCode)
    }

    /// Total encoded length
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Encode into a wire frame
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.packet_type as u8);
        buf.put_u32(self.route_id.0);
        buf.put_u16(self.size());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode one wire frame
    ///
    /// The frame must hold exactly one packet: a payload shorter or longer
    /// than the declared size is a [`ProtocolError::SizeMismatch`].
    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: PACKET_HEADER_SIZE,
                available: frame.len(),
            });
        }

        let packet_type = PacketType::try_from(frame.get_u8())?;
        let route_id = RouteId(frame.get_u32());
        let declared = frame.get_u16() as usize;

        if frame.len() != declared {
            return Err(ProtocolError::SizeMismatch {
                declared,
                actual: frame.len(),
            });
        }

        Ok(Self {
            packet_type,
            route_id,
            payload: frame,
        })
    }
}
