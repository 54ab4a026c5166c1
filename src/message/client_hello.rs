use nom::IResult;

use super::{Cookie, KeyShare, Random};
use crate::buffer::Buf;
use crate::types::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub cookie: Cookie,
    pub key_share: KeyShare,
}

impl ClientHello {
    pub fn new(random: Random, cookie: Cookie, key_share: KeyShare) -> Self {
        ClientHello {
            client_version: ProtocolVersion::V1,
            random,
            cookie,
            key_share,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;
        let (input, key_share) = KeyShare::parse(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                cookie,
                key_share,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.client_version.to_bytes());
        self.random.serialize(output);
        self.cookie.serialize(output);
        self.key_share.serialize(output);
    }

    /// Serialize with an empty cookie.
    ///
    /// This is the form that enters the transcript, so a retry carrying a
    /// fresh cookie hashes identically.
    pub fn serialize_without_cookie(&self, output: &mut Buf) {
        output.extend_from_slice(&self.client_version.to_bytes());
        self.random.serialize(output);
        Cookie::empty().serialize(output);
        self.key_share.serialize(output);
    }
}
