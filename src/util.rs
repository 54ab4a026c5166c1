use std::ops::RangeFrom;

use nom::error::{make_error, ErrorKind, ParseError};
use nom::{Err, IResult, InputIter, InputLength, Slice};

use crate::buffer::Buf;

/// Largest value representable in a 48-bit record sequence number.
pub const U48_MAX: u64 = (1 << 48) - 1;

pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

/// Write the low 24 bits of `v` big endian.
pub fn put_u24(out: &mut Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

/// Write the low 48 bits of `v` big endian.
pub fn put_u48(out: &mut Buf, v: u64) {
    out.extend_from_slice(&v.to_be_bytes()[2..]);
}
