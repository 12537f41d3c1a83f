use std::collections::HashSet;

use tracing::warn;

use crate::limits::{MAX_RESERVATIONS, MINUTE_MS};
use crate::model::*;

use super::EngineError;

/// The reservation registry. Clock-free: every time-dependent operation
/// takes `now` from the caller. Kept in registration order.
#[derive(Debug, Default)]
pub struct TableStore {
    tables: Vec<Reservation>,
}

impl TableStore {
    /// Rebuild from persisted records. A record repeating an earlier id or an
    /// earlier table number is dropped.
    pub fn from_records(records: Vec<Reservation>) -> Self {
        let mut seen = HashSet::new();
        let mut tables = Vec::with_capacity(records.len());
        for r in records {
            if !seen.insert(r.id.clone()) {
                warn!("dropping restored reservation with duplicate id {}", r.id);
                continue;
            }
            if tables.iter().any(|t: &Reservation| t.table_number == r.table_number) {
                warn!("dropping restored reservation {} for already occupied table {}", r.id, r.table_number);
                continue;
            }
            tables.push(r);
        }
        Self { tables }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.tables.iter().find(|r| &r.id == id)
    }

    pub fn list(&self) -> Vec<Reservation> {
        self.tables.clone()
    }

    fn position(&self, id: &ReservationId) -> Result<usize, EngineError> {
        self.tables
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    fn table_taken(&self, table_number: &str, except: Option<&ReservationId>) -> bool {
        self.tables
            .iter()
            .any(|r| r.table_number == table_number && Some(&r.id) != except)
    }

    fn fresh_id(&self) -> ReservationId {
        loop {
            let id = ReservationId::generate();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    // ── Mutations ────────────────────────────────────────────

    pub fn register(
        &mut self,
        new: NewReservation,
        now: Ms,
        duration: Ms,
    ) -> Result<Reservation, EngineError> {
        if self.tables.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if self.table_taken(&new.table_number, None) {
            return Err(EngineError::DuplicateTable(new.table_number));
        }
        if self.tables.iter().any(|r| r.is_guest(&new.name, &new.phone)) {
            return Err(EngineError::DuplicateGuest {
                name: new.name,
                phone: new.phone,
            });
        }

        let reservation = Reservation {
            id: self.fresh_id(),
            table_number: new.table_number,
            name: new.name,
            phone: new.phone,
            party_size: new.party_size,
            start_time: now,
            end_time: now.saturating_add(duration),
            notifications: NotificationLatches::default(),
        };
        self.tables.push(reservation.clone());
        Ok(reservation)
    }

    pub fn delete(&mut self, id: &ReservationId) -> Result<Reservation, EngineError> {
        let pos = self.position(id)?;
        Ok(self.tables.remove(pos))
    }

    /// Move the end time by `delta_minutes` and open a new latch epoch.
    pub fn adjust_time(
        &mut self,
        id: &ReservationId,
        delta_minutes: i64,
    ) -> Result<Reservation, EngineError> {
        let pos = self.position(id)?;
        let r = &mut self.tables[pos];
        r.end_time = r
            .end_time
            .saturating_add(delta_minutes.saturating_mul(MINUTE_MS));
        r.notifications.reset();
        Ok(r.clone())
    }

    /// Replace identity/contact fields. A table number taken by another
    /// reservation rejects the whole patch.
    pub fn edit(
        &mut self,
        id: &ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let pos = self.position(id)?;
        if let Some(table_number) = &patch.table_number
            && self.table_taken(table_number, Some(id))
        {
            return Err(EngineError::DuplicateTable(table_number.clone()));
        }
        let r = &mut self.tables[pos];
        patch.apply(r);
        Ok(r.clone())
    }

    // ── Tick support ─────────────────────────────────────────

    /// Run every reservation's latches against `now`; returns the alarms
    /// that fired, grouped per reservation in registration order.
    pub fn evaluate_alarms(&mut self, now: Ms) -> Vec<Alarm> {
        let mut alarms = Vec::new();
        for r in &mut self.tables {
            let remaining = r.remaining(now);
            for threshold in r.notifications.evaluate(remaining) {
                alarms.push(Alarm::new(r, threshold));
            }
        }
        alarms
    }

    pub fn snapshot(&self, now: Ms) -> Snapshot {
        Snapshot {
            taken_at: now,
            tables: self.tables.iter().map(|r| r.view(now)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;
    const DURATION: Ms = 120 * M;

    fn guest(table: &str, name: &str, phone: &str) -> NewReservation {
        NewReservation {
            table_number: table.into(),
            name: name.into(),
            phone: phone.into(),
            party_size: 2,
        }
    }

    #[test]
    fn register_sets_window_and_clears_latches() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "010-1111-2222"), 1_000, DURATION).unwrap();
        assert_eq!(r.start_time, 1_000);
        assert_eq!(r.end_time, 1_000 + DURATION);
        assert!(!r.notifications.any_set());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_table_rejected_and_size_unchanged() {
        let mut store = TableStore::default();
        store.register(guest("7", "Kim", "010-1111-2222"), 0, DURATION).unwrap();
        let err = store
            .register(guest("7", "Lee", "010-3333-4444"), 0, DURATION)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTable(ref t) if t == "7"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_guest_rejected() {
        let mut store = TableStore::default();
        store.register(guest("1", "Kim", "010-1111-2222"), 0, DURATION).unwrap();
        let err = store
            .register(guest("2", "Kim", "010-1111-2222"), 0, DURATION)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateGuest { .. }));
        // Same name, different phone is a different guest
        store.register(guest("2", "Kim", "010-9999-0000"), 0, DURATION).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn table_number_reusable_after_delete() {
        let mut store = TableStore::default();
        let r = store.register(guest("3", "Kim", "1"), 0, DURATION).unwrap();
        store.delete(&r.id).unwrap();
        store.register(guest("3", "Lee", "2"), 0, DURATION).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_unknown_is_not_found() {
        let mut store = TableStore::default();
        let err = store.delete(&ReservationId::from("missing")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn adjust_time_round_trip_restores_end_time() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        store.adjust_time(&r.id, 10).unwrap();
        assert_eq!(store.get(&r.id).unwrap().end_time, r.end_time + 10 * M);
        let back = store.adjust_time(&r.id, -10).unwrap();
        assert_eq!(back.end_time, r.end_time);
        assert!(!back.notifications.any_set());
    }

    #[test]
    fn adjust_time_has_no_clamp_and_resets_latches() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        store.adjust_time(&r.id, -500).unwrap();
        assert_eq!(store.evaluate_alarms(0).len(), 3);
        let moved = store.adjust_time(&r.id, -1).unwrap();
        assert!(moved.end_time < moved.start_time);
        assert!(!moved.notifications.any_set());
    }

    #[test]
    fn edit_rejects_table_collision_whole() {
        let mut store = TableStore::default();
        store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        let b = store.register(guest("2", "Lee", "2"), 0, DURATION).unwrap();
        let patch = ReservationPatch {
            table_number: Some("1".into()),
            name: Some("Park".into()),
            ..Default::default()
        };
        assert!(matches!(store.edit(&b.id, patch), Err(EngineError::DuplicateTable(_))));
        let unchanged = store.get(&b.id).unwrap();
        assert_eq!(unchanged.table_number, "2");
        assert_eq!(unchanged.name, "Lee");
    }

    #[test]
    fn edit_keeps_times_and_latches() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        store.adjust_time(&r.id, -115).unwrap();
        store.evaluate_alarms(0);
        let before = store.get(&r.id).unwrap().clone();

        let patch = ReservationPatch {
            table_number: Some("1".into()),
            party_size: Some(6),
            ..Default::default()
        };
        let after = store.edit(&r.id, patch).unwrap();
        assert_eq!(after.party_size, 6);
        assert_eq!(after.end_time, before.end_time);
        assert_eq!(after.start_time, before.start_time);
        assert_eq!(after.notifications, before.notifications);
    }

    #[test]
    fn snapshot_reports_negative_remaining_for_expired() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        let snap = store.snapshot(DURATION + 5_000);
        assert_eq!(snap.find(&r.id).unwrap().remaining_time, -5_000);
    }

    #[test]
    fn from_records_drops_occupied_table() {
        let mut store = TableStore::default();
        let first = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        let mut clash = first.clone();
        clash.id = ReservationId::from("other");
        clash.name = "Lee".into();
        let second = store.register(guest("2", "Park", "2"), 0, DURATION).unwrap();

        let restored = TableStore::from_records(vec![first.clone(), clash, second.clone()]);
        assert_eq!(restored.list(), vec![first, second]);
    }

    #[test]
    fn from_records_drops_repeated_ids() {
        let mut store = TableStore::default();
        let r = store.register(guest("1", "Kim", "1"), 0, DURATION).unwrap();
        let restored = TableStore::from_records(vec![r.clone(), r.clone()]);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.list(), vec![r]);
    }
}
