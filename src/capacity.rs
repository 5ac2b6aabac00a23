use crate::carrier::carrier_len;
use crate::constants::QR_V40_L_BYTES;
use crate::error::PayloadError;

/// Rejects carriers that cannot become a scannable QR code
///
/// Both "longer than the budget" and "the QR library ran out of symbol
/// versions" surface as the same `PayloadTooLarge` error. Nothing is ever
/// retried or shrunk here.
#[derive(Debug, Clone, Copy)]
pub struct CapacityGuard {
    limit: usize,
}

impl CapacityGuard {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn fits(&self, length: usize) -> bool {
        length <= self.limit
    }

    pub fn check(&self, carrier: &str) -> Result<(), PayloadError> {
        let length = carrier_len(carrier);
        if self.fits(length) {
            Ok(())
        } else {
            Err(PayloadError::PayloadTooLarge {
                length,
                limit: self.limit,
            })
        }
    }

    /// Error for a carrier of `length` bytes the QR library could not fit into version 40
    pub fn symbol_overflow(&self, length: usize) -> PayloadError {
        PayloadError::PayloadTooLarge {
            length,
            limit: self.limit.min(QR_V40_L_BYTES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary() {
        let guard = CapacityGuard::new(10);
        assert!(guard.check("0123456789").is_ok());
        assert_eq!(
            guard.check("0123456789a"),
            Err(PayloadError::PayloadTooLarge {
                length: 11,
                limit: 10
            })
        );
    }

    #[test]
    fn test_symbol_overflow_same_kind() {
        let guard = CapacityGuard::new(70000);
        let err = guard.symbol_overflow(5000);
        assert_eq!(err.kind(), "payload_too_large");
        assert_eq!(
            err,
            PayloadError::PayloadTooLarge {
                length: 5000,
                limit: QR_V40_L_BYTES
            }
        );
    }
}
