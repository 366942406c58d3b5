//! Incoming SMS delivery.
//!
//! Messages arrive as `+CMT` URCs in PDU mode. The PDU is handed over
//! undecoded.

use crate::error::{Error, Result};
use crate::protocol::{Captures, decode_hex};

/// A delivered SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSms {
    /// Phonebook alpha tag of the sender, usually empty.
    pub alpha: String,
    /// PDU length in octets, excluding the SMSC part.
    pub length: usize,
    /// Raw PDU bytes.
    pub pdu: Vec<u8>,
}

impl ReceivedSms {
    /// Builds a message from matched `+CMT` groups.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] for a missing length or bad hex.
    pub(crate) fn from_captures(caps: &Captures) -> Result<Self> {
        let length = caps
            .parse(2)
            .ok_or_else(|| Error::malformed_notification("+CMT without length"))?;
        let pdu = decode_hex(caps.get(3).unwrap_or_default())?;

        Ok(Self {
            alpha: caps.get_str(1).unwrap_or_default().to_string(),
            length,
            pdu,
        })
    }
}

/// SMS service center address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCenter {
    /// Address digits.
    pub number: String,
    /// Type of address (`145` international, `129` national).
    pub address_type: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::notification::sms_pattern;

    #[test]
    fn test_from_captures() {
        let (_, caps) = sms_pattern()
            .expect("pattern")
            .match_prefix(b"+CMT: \"Alice\",3\r\n0001AB\r\n")
            .expect("match");

        let sms = ReceivedSms::from_captures(&caps).expect("sms");
        assert_eq!(sms.alpha, "Alice");
        assert_eq!(sms.length, 3);
        assert_eq!(sms.pdu, vec![0x00, 0x01, 0xAB]);
    }

    #[test]
    fn test_odd_pdu_rejected() {
        let (_, caps) = sms_pattern()
            .expect("pattern")
            .match_prefix(b"+CMT: \"\",1\r\n0A1\r\n")
            .expect("match");

        assert!(matches!(
            ReceivedSms::from_captures(&caps),
            Err(Error::MalformedNotification { .. })
        ));
    }
}
