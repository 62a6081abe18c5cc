//! Modbus TCP framing for FC03 (read holding registers)
//!
//! Frame layout: `[Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]`

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AcqSrvError, Result};

/// MBAP header length without the unit id
pub const MBAP_HEADER_LEN: usize = 6;

/// Unit id (1) + maximum PDU (253)
pub const MAX_MBAP_LENGTH: usize = 254;

pub const MODBUS_TCP_PROTOCOL_ID: u16 = 0x0000;

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Maximum registers in one FC03 request
pub const MAX_READ_REGISTERS: u16 = 125;

const EXCEPTION_FLAG: u8 = 0x80;

/// Parsed MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Bytes following the header (unit id + PDU)
    pub length: usize,
}

impl MbapHeader {
    pub fn parse(header: &[u8; MBAP_HEADER_LEN]) -> Result<Self> {
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        // At least unit id + function code
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(AcqSrvError::protocol(format!(
                "Invalid MBAP length: {length}"
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([header[0], header[1]]),
            protocol_id: u16::from_be_bytes([header[2], header[3]]),
            length,
        })
    }
}

/// One FC03 request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub start: u16,
    pub count: u16,
}

impl ReadRequest {
    /// Serialize to a complete ADU
    pub fn encode(&self) -> Result<Bytes> {
        if self.count == 0 || self.count > MAX_READ_REGISTERS {
            return Err(AcqSrvError::protocol(format!(
                "Invalid register count for FC03: {}",
                self.count
            )));
        }
        if u32::from(self.start) + u32::from(self.count) > 0x1_0000 {
            return Err(AcqSrvError::protocol(format!(
                "Register range {}+{} exceeds address space",
                self.start, self.count
            )));
        }

        let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + 6);
        buf.put_u16(self.transaction_id);
        buf.put_u16(MODBUS_TCP_PROTOCOL_ID);
        buf.put_u16(6); // unit id + FC + start + count
        buf.put_u8(self.unit_id);
        buf.put_u8(FC_READ_HOLDING_REGISTERS);
        buf.put_u16(self.start);
        buf.put_u16(self.count);
        Ok(buf.freeze())
    }

    /// Validate a response against this request and extract the register words
    ///
    /// `body` is everything after the MBAP header: unit id followed by the PDU.
    pub fn parse_response(&self, header: &MbapHeader, body: &[u8]) -> Result<Vec<u16>> {
        if header.transaction_id != self.transaction_id {
            return Err(AcqSrvError::protocol(format!(
                "Transaction id mismatch: expected {}, got {}",
                self.transaction_id, header.transaction_id
            )));
        }
        if header.protocol_id != MODBUS_TCP_PROTOCOL_ID {
            return Err(AcqSrvError::protocol(format!(
                "Unexpected protocol id: {}",
                header.protocol_id
            )));
        }
        if body.len() != header.length || body.len() < 2 {
            return Err(AcqSrvError::protocol(format!(
                "Truncated frame: header says {}B, got {}B",
                header.length,
                body.len()
            )));
        }

        let unit_id = body[0];
        if unit_id != self.unit_id {
            return Err(AcqSrvError::protocol(format!(
                "Unit id mismatch: expected {}, got {}",
                self.unit_id, unit_id
            )));
        }

        let function = body[1];
        if function == FC_READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
            let code = body.get(2).copied().unwrap_or(0);
            return Err(AcqSrvError::ModbusException {
                unit_id,
                function,
                code,
            });
        }
        if function != FC_READ_HOLDING_REGISTERS {
            return Err(AcqSrvError::protocol(format!(
                "Unexpected function code: {function:#04x}"
            )));
        }

        let byte_count = body.get(2).copied().map(usize::from).ok_or_else(|| {
            AcqSrvError::protocol("Missing byte count in FC03 response")
        })?;
        let expected = usize::from(self.count) * 2;
        if byte_count != expected || body.len() != 3 + byte_count {
            return Err(AcqSrvError::protocol(format!(
                "Byte count mismatch: expected {}, got {} ({}B payload)",
                expected,
                byte_count,
                body.len() - 3
            )));
        }

        Ok(body[3..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn request() -> ReadRequest {
        ReadRequest {
            transaction_id: 0x0102,
            unit_id: 1,
            start: 0x0009,
            count: 2,
        }
    }

    fn header(txn: u16, length: usize) -> MbapHeader {
        MbapHeader {
            transaction_id: txn,
            protocol_id: 0,
            length,
        }
    }

    #[test]
    fn test_encode_read_request() {
        let adu = request().encode().unwrap();
        assert_eq!(
            adu.as_ref(),
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x09, 0x00, 0x02]
        );
    }

    #[test]
    fn test_encode_rejects_bad_counts() {
        let mut req = request();
        req.count = 0;
        assert!(req.encode().is_err());

        req.count = MAX_READ_REGISTERS + 1;
        assert!(req.encode().is_err());

        req.count = 10;
        req.start = 0xFFFA;
        assert!(req.encode().is_err());
    }

    #[test]
    fn test_parse_header() {
        let hdr = MbapHeader::parse(&[0x01, 0x02, 0x00, 0x00, 0x00, 0x07]).unwrap();
        assert_eq!(hdr, header(0x0102, 7));

        assert!(MbapHeader::parse(&[0, 0, 0, 0, 0, 0]).is_err());
        assert!(MbapHeader::parse(&[0, 0, 0, 0, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_parse_response_words() {
        let body = [0x01, 0x03, 0x04, 0x00, 0x01, 0xE2, 0x40];
        let words = request()
            .parse_response(&header(0x0102, body.len()), &body)
            .unwrap();
        assert_eq!(words, vec![0x0001, 0xE240]);
    }

    #[test]
    fn test_parse_exception_response() {
        let body = [0x01, 0x83, 0x02];
        let err = request()
            .parse_response(&header(0x0102, body.len()), &body)
            .unwrap_err();
        assert!(matches!(
            err,
            AcqSrvError::ModbusException {
                unit_id: 1,
                function: 0x83,
                code: 0x02
            }
        ));
    }

    #[test]
    fn test_parse_rejects_mismatches() {
        let body = [0x01, 0x03, 0x04, 0x00, 0x01, 0xE2, 0x40];

        // Wrong transaction
        assert!(request()
            .parse_response(&header(0x0999, body.len()), &body)
            .is_err());

        // Wrong unit
        let other_unit = [0x02, 0x03, 0x04, 0x00, 0x01, 0xE2, 0x40];
        assert!(request()
            .parse_response(&header(0x0102, other_unit.len()), &other_unit)
            .is_err());

        // Short payload
        let short = [0x01, 0x03, 0x02, 0x00, 0x01];
        assert!(request()
            .parse_response(&header(0x0102, short.len()), &short)
            .is_err());

        // Wrong function
        let fc4 = [0x01, 0x04, 0x04, 0x00, 0x01, 0xE2, 0x40];
        assert!(request()
            .parse_response(&header(0x0102, fc4.len()), &fc4)
            .is_err());
    }
}
