use nom::IResult;

use super::{KeyShare, Random};
use crate::buffer::Buf;
use crate::types::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub key_share: KeyShare,
}

impl ServerHello {
    pub fn new(random: Random, key_share: KeyShare) -> Self {
        ServerHello {
            server_version: ProtocolVersion::V1,
            random,
            key_share,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, key_share) = KeyShare::parse(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                key_share,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.server_version.to_bytes());
        self.random.serialize(output);
        self.key_share.serialize(output);
    }
}
