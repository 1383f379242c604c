#![allow(dead_code)]
use rust_decimal::Decimal;

use crate::types::Candle;

/// Session-anchored VWAP snapshot for the latest candle's UTC day.
#[derive(Debug, Clone, Copy)]
pub struct VwapResult {
    pub vwap: Decimal,
    pub period_volume: Decimal,
    pub typical_price_volume: Decimal,
}

/// Anchored VWAP: cumulative typical-price x volume over cumulative volume,
/// restricted to candles sharing the latest candle's UTC date.
pub fn session_vwap(candles: &[Candle]) -> Option<VwapResult> {
    let last = candles.last()?;
    let session_date = last.timestamp.date_naive();

    let mut total_tpv = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;
    for c in candles
        .iter()
        .filter(|c| c.timestamp.date_naive() == session_date)
    {
        total_tpv += c.typical_price() * c.volume;
        total_volume += c.volume;
    }

    if total_volume.is_zero() {
        return None;
    }

    Some(VwapResult {
        vwap: total_tpv / total_volume,
        period_volume: total_volume,
        typical_price_volume: total_tpv,
    })
}

/// Per-candle anchored VWAP series for chart overlays. Cumulative sums reset
/// at each UTC date boundary; slots with zero cumulative volume are `None`.
pub fn session_vwap_series(candles: &[Candle]) -> Vec<Option<Decimal>> {
    let mut series = Vec::with_capacity(candles.len());
    let mut current_day = None;
    let mut cum_tpv = Decimal::ZERO;
    let mut cum_volume = Decimal::ZERO;

    for c in candles {
        let day = c.timestamp.date_naive();
        if current_day != Some(day) {
            current_day = Some(day);
            cum_tpv = Decimal::ZERO;
            cum_volume = Decimal::ZERO;
        }
        cum_tpv += c.typical_price() * c.volume;
        cum_volume += c.volume;

        if cum_volume.is_zero() {
            series.push(None);
        } else {
            series.push(Some(cum_tpv / cum_volume));
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(hour: u32, day: u32, price: Decimal, volume: Decimal) -> Candle {
        Candle::new(
            Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            price,
            price,
            price,
            price,
            volume,
        )
    }

    #[test]
    fn vwap_weights_by_volume() {
        // tp == price because high == low == close.
        let candles = vec![candle(0, 1, dec!(100), dec!(1)), candle(1, 1, dec!(200), dec!(3))];
        let result = session_vwap(&candles).unwrap();
        assert_eq!(result.vwap, dec!(175));
        assert_eq!(result.period_volume, dec!(4));
    }

    #[test]
    fn vwap_resets_at_day_boundary() {
        let candles = vec![
            candle(22, 1, dec!(50), dec!(10)),
            candle(23, 1, dec!(60), dec!(10)),
            candle(0, 2, dec!(100), dec!(2)),
        ];
        // Only the day-2 candle counts toward the anchored value.
        let result = session_vwap(&candles).unwrap();
        assert_eq!(result.vwap, dec!(100));

        let series = session_vwap_series(&candles);
        assert_eq!(series[1], Some(dec!(55)));
        assert_eq!(series[2], Some(dec!(100)));
    }

    #[test]
    fn zero_volume_session_yields_none() {
        let candles = vec![candle(0, 1, dec!(100), dec!(0))];
        assert!(session_vwap(&candles).is_none());
        assert_eq!(session_vwap_series(&candles), vec![None]);
    }
}
