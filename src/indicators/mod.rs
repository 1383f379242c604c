//! Indicator kernel.
//!
//! Every indicator is a pure function of a candle window; nothing here
//! retains state across calls. Windows shorter than an indicator's minimum
//! yield `None` (or zero where documented), never an error.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod regime;
pub mod sfp;
pub mod stoch_rsi;
pub mod swing;
pub mod vwap;

pub use adx::*;
pub use atr::*;
pub use bollinger::*;
pub use ema::*;
pub use regime::*;
pub use sfp::*;
pub use stoch_rsi::*;
pub use swing::*;
pub use vwap::*;

use rust_decimal::Decimal;

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u32))
}

pub fn highest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    values.iter().rev().take(period).max().copied()
}

pub fn lowest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    values.iter().rev().take(period).min().copied()
}

/// Population standard deviation over the trailing `period` values.
pub fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u32);

    Some(sqrt_decimal(variance))
}

/// Newton-Raphson square root; good to ~1e-10 which is far below any
/// price tick this engine deals in.
pub fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = value;
    }
    let epsilon = Decimal::new(1, 10);

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_over_tail() {
        let values = vec![dec!(1), dec!(2), dec!(3), dec!(4)];
        assert_eq!(sma(&values, 2), Some(dec!(3.5)));
        assert_eq!(sma(&values, 5), None);
    }

    #[test]
    fn sqrt_of_perfect_square() {
        let root = sqrt_decimal(dec!(144));
        assert!((root - dec!(12)).abs() < dec!(0.000001));
    }

    #[test]
    fn stddev_of_constant_is_zero() {
        let values = vec![dec!(5); 10];
        assert_eq!(stddev(&values, 10), Some(Decimal::ZERO));
    }
}
