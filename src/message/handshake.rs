use std::ops::Range;

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use super::{ClientHello, Finished, HelloVerifyRequest, ServerHello};
use crate::buffer::Buf;
use crate::util::put_u24;

/// Size of the handshake header preceding every fragment.
pub const HANDSHAKE_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Finished,
    Unknown(u8),
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

/// Handshake fragment header.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct Header {
    pub msg_type: MessageType,
    /// Length of the complete message body.
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    /// Header for an unfragmented message.
    pub fn whole(msg_type: MessageType, message_seq: u16, length: u32) -> Self {
        Header {
            msg_type,
            length,
            message_seq,
            fragment_offset: 0,
            fragment_length: length,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        let header = Header {
            msg_type,
            length,
            message_seq,
            fragment_offset,
            fragment_length,
        };

        // The fragment must lie within the message.
        if fragment_offset as u64 + fragment_length as u64 > length as u64 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        Ok((input, header))
    }

    /// Parse a header followed by its fragment bytes.
    pub fn parse_fragment(input: &[u8]) -> IResult<&[u8], (Header, &[u8])> {
        let (input, header) = Self::parse(input)?;
        let (input, fragment) = take(header.fragment_length as usize)(input)?;
        Ok((input, (header, fragment)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        put_u24(output, self.fragment_offset);
        put_u24(output, self.fragment_length);
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset > 0 || self.fragment_length < self.length
    }

    /// Byte range of this fragment within the complete body.
    pub fn fragment_range(&self) -> Range<usize> {
        let start = self.fragment_offset as usize;
        start..start + self.fragment_length as usize
    }
}

/// A parsed handshake message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    Finished(Finished),
}

impl Body {
    /// Parse a complete body. Trailing bytes are an error.
    pub fn parse(msg_type: MessageType, input: &[u8]) -> Result<Body, crate::Error> {
        let (rest, body) = match msg_type {
            MessageType::ClientHello => {
                let (rest, m) = ClientHello::parse(input)?;
                (rest, Body::ClientHello(m))
            }
            MessageType::ServerHello => {
                let (rest, m) = ServerHello::parse(input)?;
                (rest, Body::ServerHello(m))
            }
            MessageType::HelloVerifyRequest => {
                let (rest, m) = HelloVerifyRequest::parse(input)?;
                (rest, Body::HelloVerifyRequest(m))
            }
            MessageType::Finished => {
                let (rest, m) = Finished::parse(input)?;
                (rest, Body::Finished(m))
            }
            MessageType::Unknown(v) => {
                return Err(crate::Error::ParseError(format!(
                    "Unknown handshake type: {}",
                    v
                )))
            }
        };

        if !rest.is_empty() {
            return Err(crate::Error::ParseError(format!(
                "{} trailing bytes in {:?}",
                rest.len(),
                msg_type
            )));
        }

        Ok(body)
    }
}

/// Append the 4 byte `msg_type | length` header and the body to a transcript.
pub fn append_transcript(msg_type: MessageType, body: &[u8], transcript: &mut Buf) {
    transcript.push(msg_type.as_u8());
    put_u24(transcript, body.len() as u32);
    transcript.extend_from_slice(body);
}
