//! Value Objects for the marketplace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kenyan mobile number in the canonical `2547XXXXXXXX` form the provider expects.
///
/// Accepts the three local spellings: `07XXXXXXXX`, `2547XXXXXXXX` and `+2547XXXXXXXX`.
/// The subscriber part is nine digits and never starts with zero.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub const COUNTRY_CODE: &'static str = "254";

    pub fn parse(value: &str) -> Result<Self, PhoneNumberError> {
        let value = value.trim();
        let subscriber = value
            .strip_prefix("+254")
            .or_else(|| value.strip_prefix("254"))
            .or_else(|| value.strip_prefix('0'))
            .ok_or(PhoneNumberError::UnknownPrefix)?;
        if subscriber.len() != 9 || !subscriber.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PhoneNumberError::BadSubscriber);
        }
        if subscriber.starts_with('0') { return Err(PhoneNumberError::BadSubscriber); }
        Ok(Self(format!("{}{}", Self::COUNTRY_CODE, subscriber)))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PhoneNumberError { UnknownPrefix, BadSubscriber }
impl std::error::Error for PhoneNumberError {}
impl fmt::Display for PhoneNumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPrefix => write!(f, "Invalid phone number format."),
            Self::BadSubscriber => write!(f, "Invalid phone number format."),
        }
    }
}

/// Stock or line quantity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_spellings_normalize_to_one_form() {
        let local = PhoneNumber::parse("0712345678").unwrap();
        let bare = PhoneNumber::parse("254712345678").unwrap();
        let plus = PhoneNumber::parse("+254712345678").unwrap();
        assert_eq!(local.as_str(), "254712345678");
        assert_eq!(local, bare);
        assert_eq!(bare, plus);
    }

    #[test]
    fn test_phone_landline_style_prefix_accepted() {
        assert_eq!(PhoneNumber::parse("0201234567").unwrap().as_str(), "254201234567");
        assert_eq!(PhoneNumber::parse("0110234567").unwrap().as_str(), "254110234567");
    }

    #[test]
    fn test_phone_rejects_malformed() {
        assert_eq!(PhoneNumber::parse("712345678"), Err(PhoneNumberError::UnknownPrefix));
        assert_eq!(PhoneNumber::parse("07123456"), Err(PhoneNumberError::BadSubscriber));
        assert_eq!(PhoneNumber::parse("07123456789"), Err(PhoneNumberError::BadSubscriber));
        assert_eq!(PhoneNumber::parse("0012345678"), Err(PhoneNumberError::BadSubscriber));
        assert_eq!(PhoneNumber::parse("07123x5678"), Err(PhoneNumberError::BadSubscriber));
        assert_eq!(PhoneNumber::parse("+1712345678"), Err(PhoneNumberError::UnknownPrefix));
    }

    #[test]
    fn test_quantity() {
        let q = Quantity::new(5);
        assert_eq!(q.add(3).value(), 8);
        assert_eq!(q.subtract(5), Some(Quantity::new(0)));
        assert!(q.subtract(6).is_none());
        assert_eq!(Quantity::default().value(), 0);
    }
}
