//! Live Request Ledger: per-driver outstanding ride offers.
//!
//! Kept outside the driver documents so the dispatch fan-out, an accept
//! racing it, and the sweeps all mutate offers through targeted per-driver
//! operations instead of read-modify-write over a whole driver record.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Offer {
    pub ride_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RequestLedger {
    entries: DashMap<Uuid, Vec<Offer>>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers an offer. A second offer for the same ride to the same
    /// driver is a no-op; returns whether the entry was added.
    pub fn offer(&self, driver_id: Uuid, ride_id: Uuid, expires_at: DateTime<Utc>) -> bool {
        let mut offers = self.entries.entry(driver_id).or_default();
        if offers.iter().any(|offer| offer.ride_id == ride_id) {
            return false;
        }
        offers.push(Offer { ride_id, expires_at });
        true
    }

    pub fn holds_offer(&self, driver_id: Uuid, ride_id: Uuid) -> bool {
        self.entries
            .get(&driver_id)
            .map(|offers| offers.iter().any(|offer| offer.ride_id == ride_id))
            .unwrap_or(false)
    }

    /// Removes the ride's offer from every driver holding one and returns
    /// the drivers it was withdrawn from. Used when a ride is claimed,
    /// cancelled, or resolved as unmatched.
    pub fn withdraw(&self, ride_id: Uuid) -> Vec<Uuid> {
        let mut holders = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|offer| offer.ride_id != ride_id);
            if entry.value().len() < before {
                holders.push(*entry.key());
            }
        }
        holders
    }

    /// Removes one driver's offer for one ride (decline, disconnect).
    pub fn withdraw_one(&self, driver_id: Uuid, ride_id: Uuid) -> bool {
        match self.entries.get_mut(&driver_id) {
            Some(mut offers) => {
                let before = offers.len();
                offers.retain(|offer| offer.ride_id != ride_id);
                offers.len() < before
            }
            None => false,
        }
    }

    /// Drops every offer a driver holds (forced offline) and returns the
    /// affected ride ids.
    pub fn drop_driver(&self, driver_id: Uuid) -> Vec<Uuid> {
        match self.entries.remove(&driver_id) {
            Some((_, offers)) => offers.into_iter().map(|offer| offer.ride_id).collect(),
            None => Vec::new(),
        }
    }

    /// Removes every offer expired as of `now` and reports the removed
    /// (driver, ride) pairs. The caller decides which rides resolve to
    /// no-match; the ledger only removes. Evaluating against one `now`
    /// snapshot keeps a driver's accept from racing its own expiry within
    /// the same sweep.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> Vec<(Uuid, Uuid)> {
        let mut removed = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let driver_id = *entry.key();
            entry.value_mut().retain(|offer| {
                if offer.expires_at < now {
                    removed.push((driver_id, offer.ride_id));
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    /// Number of drivers still holding an offer for this ride.
    pub fn holders(&self, ride_id: Uuid) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().iter().any(|offer| offer.ride_id == ride_id))
            .count()
    }

    pub fn outstanding(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::RequestLedger;

    #[test]
    fn duplicate_offer_for_same_ride_is_rejected() {
        let ledger = RequestLedger::new();
        let driver = Uuid::new_v4();
        let ride = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(5);

        assert!(ledger.offer(driver, ride, expires));
        assert!(!ledger.offer(driver, ride, expires));
        assert_eq!(ledger.outstanding(), 1);
    }

    #[test]
    fn withdraw_removes_ride_from_all_drivers() {
        let ledger = RequestLedger::new();
        let ride = Uuid::new_v4();
        let other_ride = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(5);

        let drivers: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for driver in &drivers {
            ledger.offer(*driver, ride, expires);
        }
        ledger.offer(drivers[0], other_ride, expires);

        let mut holders = ledger.withdraw(ride);
        holders.sort();
        let mut expected = drivers.clone();
        expected.sort();
        assert_eq!(holders, expected);

        assert_eq!(ledger.holders(ride), 0);
        assert!(ledger.holds_offer(drivers[0], other_ride));
    }

    #[test]
    fn withdraw_one_leaves_other_drivers_untouched() {
        let ledger = RequestLedger::new();
        let ride = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(5);

        ledger.offer(a, ride, expires);
        ledger.offer(b, ride, expires);

        assert!(ledger.withdraw_one(a, ride));
        assert!(!ledger.withdraw_one(a, ride));
        assert!(!ledger.holds_offer(a, ride));
        assert!(ledger.holds_offer(b, ride));
    }

    #[test]
    fn expire_sweep_removes_only_expired_entries() {
        let ledger = RequestLedger::new();
        let driver = Uuid::new_v4();
        let stale_ride = Uuid::new_v4();
        let fresh_ride = Uuid::new_v4();
        let now = Utc::now();

        ledger.offer(driver, stale_ride, now - Duration::seconds(1));
        ledger.offer(driver, fresh_ride, now + Duration::minutes(5));

        let removed = ledger.expire_sweep(now);
        assert_eq!(removed, vec![(driver, stale_ride)]);
        assert!(!ledger.holds_offer(driver, stale_ride));
        assert!(ledger.holds_offer(driver, fresh_ride));
    }

    #[test]
    fn drop_driver_reports_affected_rides() {
        let ledger = RequestLedger::new();
        let driver = Uuid::new_v4();
        let ride_a = Uuid::new_v4();
        let ride_b = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(5);

        ledger.offer(driver, ride_a, expires);
        ledger.offer(driver, ride_b, expires);

        let mut dropped = ledger.drop_driver(driver);
        dropped.sort();
        let mut expected = vec![ride_a, ride_b];
        expected.sort();
        assert_eq!(dropped, expected);
        assert_eq!(ledger.outstanding(), 0);
    }
}
