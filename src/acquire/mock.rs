use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use rand::Rng;

use crate::model::{SideQuote, Snapshot, StrikeRow, Symbol};

/// Strikes generated either side of the reference price.
const STRIKES_PER_SIDE: i32 = 10;

/// Synthetic, schema-valid chains for running without a browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockGenerator;

impl MockGenerator {
    pub fn generate(&self, symbol: Symbol) -> Snapshot {
        self.generate_with(symbol, Utc::now(), &mut rand::rng())
    }

    /// The source timestamp is pinned to the minute, so repeated polls in
    /// the same minute share an identity.
    pub fn generate_with<R: Rng>(
        &self,
        symbol: Symbol,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Snapshot {
        let base = symbol.reference_price();
        let step = symbol.strike_step();
        let expiries = weekly_expiries(now, 2);

        let rows = (-STRIKES_PER_SIDE..=STRIKES_PER_SIDE)
            .map(|i| {
                let mut row = StrikeRow::new(
                    base + f64::from(i) * step,
                    random_side(rng),
                    random_side(rng),
                );
                row.expiry_date = expiries.first().cloned();
                row
            })
            .collect();

        let mut snapshot = Snapshot::new(symbol, base + rng.random_range(-50.0..50.0), rows);
        snapshot.captured_at = now;
        snapshot.expiry_dates = expiries;
        snapshot.source_timestamp = Some(mock_identity(now));
        snapshot
    }
}

fn random_side<R: Rng>(rng: &mut R) -> SideQuote {
    SideQuote {
        open_interest: f64::from(rng.random_range(0..100_000u32)),
        change_in_open_interest: f64::from(rng.random_range(0..5_000u32)),
        ..Default::default()
    }
}

/// `MOCK_<epoch ms truncated to the minute>`.
pub fn mock_identity(now: DateTime<Utc>) -> String {
    let ms = now.timestamp_millis();
    format!("MOCK_{}", ms - ms.rem_euclid(60_000))
}

/// The next `count` Thursdays on or after `now`, formatted as the provider
/// lists them.
fn weekly_expiries(now: DateTime<Utc>, count: usize) -> Vec<String> {
    let today = now.date_naive();
    let ahead = (Weekday::Thu.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    let first = today + Duration::days(i64::from(ahead));
    (0..count)
        .map(|w| (first + Duration::weeks(w as i64)).format("%d-%b-%Y").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    #[test]
    fn chain_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let snap = MockGenerator.generate_with(Symbol::Nifty, at(9, 30, 0), &mut rng);

        assert_eq!(snap.rows.len(), 21);
        assert_eq!(snap.rows[0].strike_price, 19_000.0);
        assert_eq!(snap.rows[10].strike_price, 19_500.0);
        assert_eq!(snap.rows[20].strike_price, 20_000.0);
        assert!((snap.underlying_value - 19_500.0).abs() <= 50.0);
        for row in &snap.rows {
            assert!((0.0..100_000.0).contains(&row.call.open_interest));
            assert!((0.0..5_000.0).contains(&row.put.change_in_open_interest));
            assert_eq!(row.call.diff_open_interest, 0.0);
        }
    }

    #[test]
    fn bank_nifty_uses_its_own_grid() {
        let mut rng = StdRng::seed_from_u64(1);
        let snap = MockGenerator.generate_with(Symbol::BankNifty, at(9, 30, 0), &mut rng);
        assert_eq!(snap.rows[10].strike_price, 44_500.0);
        assert_eq!(snap.rows[11].strike_price - snap.rows[10].strike_price, 100.0);
    }

    #[test]
    fn identity_is_stable_within_a_minute() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = MockGenerator.generate_with(Symbol::Nifty, at(10, 15, 2), &mut rng);
        let b = MockGenerator.generate_with(Symbol::Nifty, at(10, 15, 59), &mut rng);
        let c = MockGenerator.generate_with(Symbol::Nifty, at(10, 16, 0), &mut rng);

        assert_eq!(a.source_timestamp, b.source_timestamp);
        assert_ne!(b.source_timestamp, c.source_timestamp);
        assert_eq!(
            c.source_timestamp.as_deref(),
            Some(format!("MOCK_{}", at(10, 16, 0).timestamp_millis()).as_str())
        );
    }

    #[test]
    fn expiries_are_upcoming_thursdays() {
        // 19 Oct 2026 is a Monday.
        assert_eq!(
            weekly_expiries(at(12, 0, 0), 2),
            vec!["22-Oct-2026".to_string(), "29-Oct-2026".to_string()]
        );
    }
}
