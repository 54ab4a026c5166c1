use std::fmt;
use std::ops::Deref;

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::rng::{random_array, RandomSource};

/// 32 bytes of hello randomness.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Random([u8; 32]);

impl Random {
    pub fn new(rng: &mut dyn RandomSource) -> Result<Self, crate::Error> {
        Ok(Random(random_array(rng)?))
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(32_usize)(input)?;
        let mut random = [0; 32];
        random.copy_from_slice(bytes);
        Ok((input, Random(random)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.0);
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Random({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// An x25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyShare([u8; 32]);

impl KeyShare {
    pub fn new(bytes: [u8; 32]) -> Self {
        KeyShare(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], KeyShare> {
        let (input, bytes) = take(32_usize)(input)?;
        let mut key = [0; 32];
        key.copy_from_slice(bytes);
        Ok((input, KeyShare(key)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.0);
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyShare({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Opaque cookie, round-tripped byte for byte. At most 255 bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Cookie(ArrayVec<u8, 255>);

impl Cookie {
    pub fn empty() -> Self {
        Cookie(ArrayVec::new())
    }

    /// `None` if `data` is longer than 255 bytes.
    pub fn try_new(data: &[u8]) -> Option<Self> {
        let mut inner = ArrayVec::new();
        inner.try_extend_from_slice(data).ok()?;
        Some(Cookie(inner))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Cookie> {
        let (input, len) = be_u8(input)?;
        let (input, data) = take(len as usize)(input)?;
        // len is a u8, so this always fits.
        let cookie = Cookie::try_new(data)
            .ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::LengthValue)))?;
        Ok((input, cookie))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}

impl Deref for Cookie {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({})", self.0.len())
    }
}
