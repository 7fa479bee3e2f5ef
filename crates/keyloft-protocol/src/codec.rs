//! Binary wire codec.
//!
//! Everything on the wire is big-endian. Variable-width fields carry a
//! 4-byte length prefix: "data" is raw bytes, "MPI" is the big-endian
//! magnitude of an unsigned integer (non-canonical leading zeros are
//! accepted on decode). The decoder is a cursor over a borrowed buffer;
//! every read checks bounds before slicing and consumes exactly the
//! declared length, so message deserializers compose by short-circuiting
//! on the first error.

use keyloft_crypto::keys::{decode_point, decode_scalar, encode_point, encode_scalar, POINT_LEN, SCALAR_LEN};
use keyloft_crypto::{BigUint, EdwardsPoint, Scalar};

use crate::error::ProtocolError;

/// Wire writer backed by a growable buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// 8-byte Unix-seconds timestamp.
    pub fn write_timestamp(&mut self, seconds: u64) -> &mut Self {
        self.write_u64(seconds)
    }

    /// Length-prefixed byte string.
    pub fn write_data(&mut self, v: &[u8]) -> &mut Self {
        let len = u32::try_from(v.len()).expect("field length must fit in u32");
        self.write_u32(len);
        self.buf.extend_from_slice(v);
        self
    }

    /// Length-prefixed big-endian unsigned integer.
    pub fn write_mpi(&mut self, v: &BigUint) -> &mut Self {
        self.write_data(&v.to_bytes_be())
    }

    pub fn write_point(&mut self, p: &EdwardsPoint) -> &mut Self {
        self.buf.extend_from_slice(&encode_point(p));
        self
    }

    pub fn write_scalar(&mut self, s: &Scalar) -> &mut Self {
        self.buf.extend_from_slice(&encode_scalar(s));
        self
    }

    pub fn write_raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Wire reader: a cursor over a borrowed buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail if any bytes remain unconsumed.
    pub fn expect_end(&self) -> Result<(), ProtocolError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes)
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if n > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    /// 8-byte Unix-seconds timestamp, interpreted as UTC.
    pub fn read_timestamp(&mut self) -> Result<u64, ProtocolError> {
        self.read_u64()
    }

    /// Length-prefixed byte string. The declared length must fit in the
    /// remaining buffer.
    pub fn read_data(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Length-prefixed big-endian unsigned integer. Leading zeros are
    /// accepted; canonical form is not required.
    pub fn read_mpi(&mut self) -> Result<BigUint, ProtocolError> {
        let bytes = self.read_data()?;
        Ok(BigUint::from_bytes_be(&bytes))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn read_point(&mut self) -> Result<EdwardsPoint, ProtocolError> {
        let bytes = self.take(POINT_LEN)?;
        Ok(decode_point(bytes)?)
    }

    pub fn read_scalar(&mut self) -> Result<Scalar, ProtocolError> {
        let bytes = self.take(SCALAR_LEN)?;
        Ok(decode_scalar(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_wire_format() {
        let mut enc = Encoder::new();
        enc.write_u8(0xAB)
            .write_u16(0x0102)
            .write_u32(0x0304_0506)
            .write_u64(0x0708_090A_0B0C_0D0E);
        assert_eq!(
            enc.finish(),
            [
                0xAB, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
                0x0D, 0x0E
            ]
        );
    }

    #[test]
    fn data_wire_format() {
        let mut enc = Encoder::new();
        enc.write_data(b"abc");
        assert_eq!(enc.finish(), [0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn mpi_wire_format() {
        let mut enc = Encoder::new();
        enc.write_mpi(&BigUint::from(0x0102_03u32));
        assert_eq!(enc.finish(), [0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn roundtrip_all_primitives() {
        let mut enc = Encoder::new();
        enc.write_u8(7)
            .write_u16(65535)
            .write_u32(123_456)
            .write_u64(u64::MAX)
            .write_timestamp(1_700_000_000)
            .write_data(b"payload")
            .write_mpi(&BigUint::from(987_654_321u32));
        let bytes = enc.finish();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_u8().unwrap(), 7);
        assert_eq!(dec.read_u16().unwrap(), 65535);
        assert_eq!(dec.read_u32().unwrap(), 123_456);
        assert_eq!(dec.read_u64().unwrap(), u64::MAX);
        assert_eq!(dec.read_timestamp().unwrap(), 1_700_000_000);
        assert_eq!(dec.read_data().unwrap(), b"payload");
        assert_eq!(dec.read_mpi().unwrap(), BigUint::from(987_654_321u32));
        assert!(dec.expect_end().is_ok());
    }

    #[test]
    fn truncated_fixed_width_fails() {
        let mut dec = Decoder::new(&[0x01]);
        assert!(matches!(
            dec.read_u32(),
            Err(ProtocolError::Truncated {
                needed: 4,
                remaining: 1
            })
        ));
    }

    #[test]
    fn declared_length_exceeding_buffer_fails() {
        // Length prefix says 10 bytes, only 2 follow.
        let bytes = [0x00, 0x00, 0x00, 0x0A, 0x01, 0x02];
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            dec.read_data(),
            Err(ProtocolError::Truncated {
                needed: 10,
                remaining: 2
            })
        ));
    }

    #[test]
    fn mpi_accepts_leading_zeros() {
        let bytes = [0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x05];
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_mpi().unwrap(), BigUint::from(5u8));
    }

    #[test]
    fn trailing_bytes_detected() {
        let dec = Decoder::new(&[0x00]);
        assert_eq!(dec.expect_end().unwrap_err(), ProtocolError::TrailingBytes);
    }

    #[test]
    fn point_roundtrip_through_codec() {
        use keyloft_crypto::Keypair;
        use rand::rngs::OsRng;

        let kp = Keypair::generate(&mut OsRng);
        let mut enc = Encoder::new();
        enc.write_point(&kp.public());
        let bytes = enc.finish();
        assert_eq!(bytes.len(), POINT_LEN);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_point().unwrap(), kp.public());
    }
}
