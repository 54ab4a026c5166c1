use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::util::{be_u48, put_u48};

/// Fixed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    /// Length of the payload that follows.
    pub length: u16,
}

impl RecordHeader {
    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const LEN: usize = 13;

    pub fn parse(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                sequence: Sequence {
                    epoch,
                    sequence_number,
                },
                length,
            },
        ))
    }

    /// Parse a header and borrow its payload.
    pub fn parse_record(input: &[u8]) -> IResult<&[u8], (RecordHeader, &[u8])> {
        let (input, header) = Self::parse(input)?;
        let (input, payload) = take(header.length as usize)(input)?;
        Ok((input, (header, payload)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        output.extend_from_slice(&self.version.to_bytes());
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        put_u48(output, self.sequence.sequence_number);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}
