//! Trigger characteristic payload decoding.
//!
//! | Opcode | Payload          | Signal                          |
//! |--------|------------------|---------------------------------|
//! | `0x00` | none             | none (released)                 |
//! | `0x01` | none             | [`TriggerSignal::Arm`]          |
//! | `0x02` | none             | [`TriggerSignal::Panic`]        |
//! | `0x03` | `u16` LE reading | `Arm` above the threshold       |

use thiserror::Error;

use crate::countdown::TriggerSignal;

const OP_RELEASED: u8 = 0x00;
const OP_ARM: u8 = 0x01;
const OP_PANIC: u8 = 0x02;
const OP_PRESSURE: u8 = 0x03;

/// A payload the trigger protocol does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Zero-length notification.
    #[error("empty trigger payload")]
    Empty,

    /// Unknown first byte.
    #[error("unknown trigger opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Pressure reading with the wrong length.
    #[error("pressure payload must be 3 bytes, got {0}")]
    BadPressureLength(usize),
}

/// Decode one notification into an optional signal.
///
/// # Errors
///
/// Returns a [`ProtocolError`] for payloads outside the table above.
pub fn decode_trigger(
    payload: &[u8],
    pressure_threshold: u16,
) -> Result<Option<TriggerSignal>, ProtocolError> {
    let (&opcode, rest) = payload.split_first().ok_or(ProtocolError::Empty)?;
    match opcode {
        OP_RELEASED => Ok(None),
        OP_ARM => Ok(Some(TriggerSignal::Arm)),
        OP_PANIC => Ok(Some(TriggerSignal::Panic)),
        OP_PRESSURE => match rest {
            [lo, hi] => {
                let reading = u16::from_le_bytes([*lo, *hi]);
                Ok((reading > pressure_threshold).then_some(TriggerSignal::Arm))
            }
            _ => Err(ProtocolError::BadPressureLength(payload.len())),
        },
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u16 = 30_000;

    #[test]
    fn test_simple_opcodes() {
        assert_eq!(decode_trigger(&[0x00], THRESHOLD), Ok(None));
        assert_eq!(decode_trigger(&[0x01], THRESHOLD), Ok(Some(TriggerSignal::Arm)));
        assert_eq!(
            decode_trigger(&[0x02], THRESHOLD),
            Ok(Some(TriggerSignal::Panic))
        );
    }

    #[test]
    fn test_pressure_threshold() {
        let above = 30_001u16.to_le_bytes();
        let at = 30_000u16.to_le_bytes();
        assert_eq!(
            decode_trigger(&[0x03, above[0], above[1]], THRESHOLD),
            Ok(Some(TriggerSignal::Arm))
        );
        assert_eq!(decode_trigger(&[0x03, at[0], at[1]], THRESHOLD), Ok(None));
        assert_eq!(decode_trigger(&[0x03, 0x10, 0x00], THRESHOLD), Ok(None));
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!(decode_trigger(&[], THRESHOLD), Err(ProtocolError::Empty));
        assert_eq!(
            decode_trigger(&[0x7f], THRESHOLD),
            Err(ProtocolError::UnknownOpcode(0x7f))
        );
        assert_eq!(
            decode_trigger(&[0x03, 0x01], THRESHOLD),
            Err(ProtocolError::BadPressureLength(2))
        );
    }
}
