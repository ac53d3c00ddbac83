use std::convert::TryFrom;
use std::fmt;
use memuse::DynamicUsage;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};

/// Satoshis per PIV.
pub const COIN: i64 = 1_0000_0000;
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// A signed quantity of PIV in satoshis, within `-MAX_MONEY..=MAX_MONEY`.
///
/// Arithmetic is checked: `+`, `-` and `*` yield `None` rather than leave the money
/// range. A Sapling value balance is the one place a negative amount is meaningful.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Amount(i64);

memuse::impl_no_dynamic_usage!(Amount);

impl Amount {
    pub const fn zero() -> Self {
        Amount(0)
    }

    /// Panics if `amount` is outside the money range; meant for constants.
    pub const fn const_from_i64(amount: i64) -> Self {
        assert!(-MAX_MONEY <= amount && amount <= MAX_MONEY);
        Amount(amount)
    }

    pub fn from_i64(amount: i64) -> Result<Self, ()> {
        if (-MAX_MONEY..=MAX_MONEY).contains(&amount) {
            Ok(Amount(amount))
        } else {
            Err(())
        }
    }

    pub fn from_u64(amount: u64) -> Result<Self, ()> {
        i64::try_from(amount)
            .map_err(|_| ())
            .and_then(Amount::from_i64)
    }

    /// Decodes a value balance, which may be negative.
    pub fn from_i64_le_bytes(bytes: [u8; 8]) -> Result<Self, ()> {
        Amount::from_i64(i64::from_le_bytes(bytes))
    }

    /// Decodes a transparent output value, which may not be negative.
    pub fn from_nonnegative_i64_le_bytes(bytes: [u8; 8]) -> Result<Self, ()> {
        match i64::from_le_bytes(bytes) {
            v if v < 0 => Err(()),
            v => Amount::from_i64(v),
        }
    }

    pub fn to_i64_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub const fn is_positive(self) -> bool {
        self.0.is_positive()
    }

    pub const fn is_negative(self) -> bool {
        self.0.is_negative()
    }
}

/// Whole coins with at least two decimals: `12.50`, `0.0001`.
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.0.unsigned_abs();
        let mut frac = format!("{:08}", abs % COIN as u64);
        while frac.len() > 2 && frac.ends_with('0') {
            frac.pop();
        }
        if self.0 < 0 {
            write!(f, "-")?;
        }
        write!(f, "{}.{}", abs / COIN as u64, frac)
    }
}

impl TryFrom<i64> for Amount {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, ()> {
        Amount::from_i64(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> i64 {
        amount.0
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> u64 {
        amount.0 as u64
    }
}

impl Add<Amount> for Amount {
    type Output = Option<Amount>;

    fn add(self, rhs: Amount) -> Option<Amount> {
        Amount::from_i64(self.0 + rhs.0).ok()
    }
}

impl Add<Amount> for Option<Amount> {
    type Output = Self;

    fn add(self, rhs: Amount) -> Option<Amount> {
        self.and_then(|lhs| lhs + rhs)
    }
}

impl Sub<Amount> for Amount {
    type Output = Option<Amount>;

    fn sub(self, rhs: Amount) -> Option<Amount> {
        Amount::from_i64(self.0 - rhs.0).ok()
    }
}

impl Sub<Amount> for Option<Amount> {
    type Output = Self;

    fn sub(self, rhs: Amount) -> Option<Amount> {
        self.and_then(|lhs| lhs - rhs)
    }
}

/// Totals transparent inputs or outputs; `None` once the running total leaves the
/// money range.
impl Sum<Amount> for Option<Amount> {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Some(Amount::zero()), |acc, a| acc? + a)
    }
}

/// Scales a per-output fee by an output count.
impl Mul<usize> for Amount {
    type Output = Option<Amount>;

    fn mul(self, rhs: usize) -> Option<Amount> {
        let rhs = i64::try_from(rhs).ok()?;
        self.0
            .checked_mul(rhs)
            .and_then(|i| Amount::try_from(i).ok())
    }
}

/// The builder's value balance left the money range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BalanceError {
    Overflow,
    Underflow,
}

impl fmt::Display for BalanceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            BalanceError::Overflow => write!(f, "Value balance overflowed the money range"),
            BalanceError::Underflow => write!(f, "Value balance underflowed the money range"),
        }
    }
}

impl std::error::Error for BalanceError {}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::prop_compose;

    use super::{Amount, MAX_MONEY};

    prop_compose! {
        pub fn arb_nonnegative_amount()(amt in 0i64..MAX_MONEY) -> Amount {
            Amount(amt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Amount, COIN, MAX_MONEY};

    #[test]
    fn wire_values_respect_money_range() {
        let zero = [0u8; 8];
        assert_eq!(Amount::from_nonnegative_i64_le_bytes(zero), Ok(Amount(0)));

        let neg_one = [0xff; 8];
        assert!(Amount::from_nonnegative_i64_le_bytes(neg_one).is_err());
        assert_eq!(Amount::from_i64_le_bytes(neg_one), Ok(Amount(-1)));

        let max_money = Amount(MAX_MONEY).to_i64_le_bytes();
        assert_eq!(Amount::from_i64_le_bytes(max_money), Ok(Amount(MAX_MONEY)));

        let over = (MAX_MONEY + 1).to_le_bytes();
        assert!(Amount::from_nonnegative_i64_le_bytes(over).is_err());
        assert!(Amount::from_i64_le_bytes(over).is_err());
        assert!(Amount::from_u64(MAX_MONEY as u64 + 1).is_err());
        assert!(Amount::from_u64(u64::MAX).is_err());
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(Amount(MAX_MONEY) + Amount(1), None);
        assert_eq!(Amount(-MAX_MONEY) - Amount(1), None);
        assert_eq!(Amount(COIN) * 3, Some(Amount(3 * COIN)));
        assert_eq!(Amount(MAX_MONEY) * 2, None);

        let total: Option<Amount> = vec![Amount(MAX_MONEY), Amount(1)].into_iter().sum();
        assert_eq!(total, None);
        let total: Option<Amount> = vec![Amount(COIN), Amount(2 * COIN)].into_iter().sum();
        assert_eq!(total, Some(Amount(3 * COIN)));
    }

    #[test]
    fn display_as_coins() {
        assert_eq!(Amount(0).to_string(), "0.00");
        assert_eq!(Amount(COIN).to_string(), "1.00");
        assert_eq!(Amount(COIN * 12 + COIN / 2).to_string(), "12.50");
        assert_eq!(Amount(10_000).to_string(), "0.0001");
        assert_eq!(Amount(1).to_string(), "0.00000001");
        assert_eq!(Amount(-COIN / 4).to_string(), "-0.25");
    }
}
