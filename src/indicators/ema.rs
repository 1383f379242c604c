use rust_decimal::Decimal;

/// Exponential moving average over the full slice, seeded with the first
/// value, `alpha = 2 / (period + 1)`.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let alpha = Decimal::from(2) / Decimal::from(period as u32 + 1);
    let one_minus = Decimal::ONE - alpha;

    let mut current = values[0];
    for value in &values[1..] {
        current = *value * alpha + current * one_minus;
    }
    Some(current)
}
