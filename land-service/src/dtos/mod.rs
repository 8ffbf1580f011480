//! Request and response bodies for the HTTP surface.

pub mod admin;
pub mod billing;
pub mod land;

pub use admin::*;
pub use billing::*;
pub use land::*;

use rust_decimal::Decimal;
use validator::ValidationError;

pub(crate) fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

pub(crate) fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_not_be_negative"))
    }
}

pub(crate) fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO && *value <= Decimal::from(100) {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_percentage"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_validators() {
        assert!(validate_positive(&Decimal::new(1, 2)).is_ok());
        assert!(validate_positive(&Decimal::ZERO).is_err());
        assert!(validate_non_negative(&Decimal::ZERO).is_ok());
        assert!(validate_non_negative(&Decimal::from(-1)).is_err());
        assert!(validate_percentage(&Decimal::from(100)).is_ok());
        assert!(validate_percentage(&Decimal::new(10001, 2)).is_err());
    }
}
