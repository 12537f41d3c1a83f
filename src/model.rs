use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{FIVE_MINUTE_THRESHOLD, MINUTE_MS, TEN_MINUTE_THRESHOLD};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Opaque reservation id. Fresh ids are ULIDs; restored ids keep whatever
/// string form they were persisted with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReservationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReservationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the three alarm points of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Threshold {
    TenMinute,
    FiveMinute,
    Expired,
}

impl Threshold {
    /// Evaluation order within a tick.
    pub const ALL: [Threshold; 3] = [Threshold::TenMinute, Threshold::FiveMinute, Threshold::Expired];

    fn crossed(self, remaining: Ms, remaining_minutes: i64) -> bool {
        match self {
            Threshold::TenMinute => remaining_minutes <= TEN_MINUTE_THRESHOLD,
            Threshold::FiveMinute => remaining_minutes <= FIVE_MINUTE_THRESHOLD,
            Threshold::Expired => remaining <= 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Threshold::TenMinute => "ten_minute",
            Threshold::FiveMinute => "five_minute",
            Threshold::Expired => "expired",
        }
    }

    pub fn message(self, table_number: &str) -> String {
        match self {
            Threshold::TenMinute => format!("Table {table_number}: 10 minutes remaining"),
            Threshold::FiveMinute => format!("Table {table_number}: 5 minutes remaining"),
            Threshold::Expired => format!("Table {table_number}: time is up"),
        }
    }
}

/// Remaining time in whole minutes, halves rounded up (toward +inf).
pub fn round_minutes(remaining: Ms) -> i64 {
    remaining.saturating_add(MINUTE_MS / 2).div_euclid(MINUTE_MS)
}

/// One-shot alarm latches. A latch only goes false→true; the whole set is
/// cleared by `reset` when the reservation's end time moves.
///
/// Serialized as `min10` / `min5` / `min0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLatches {
    #[serde(rename = "min10", default)]
    pub ten_minute: bool,
    #[serde(rename = "min5", default)]
    pub five_minute: bool,
    #[serde(rename = "min0", default)]
    pub expired: bool,
}

impl NotificationLatches {
    pub fn is_set(&self, threshold: Threshold) -> bool {
        match threshold {
            Threshold::TenMinute => self.ten_minute,
            Threshold::FiveMinute => self.five_minute,
            Threshold::Expired => self.expired,
        }
    }

    fn set(&mut self, threshold: Threshold) {
        match threshold {
            Threshold::TenMinute => self.ten_minute = true,
            Threshold::FiveMinute => self.five_minute = true,
            Threshold::Expired => self.expired = true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn any_set(&self) -> bool {
        self.ten_minute || self.five_minute || self.expired
    }

    /// Latch every threshold that `remaining` has crossed and that has not
    /// fired yet in this epoch. Returns the newly fired thresholds in
    /// evaluation order.
    pub fn evaluate(&mut self, remaining: Ms) -> Vec<Threshold> {
        let minutes = round_minutes(remaining);
        let mut fired = Vec::new();
        for threshold in Threshold::ALL {
            if threshold.crossed(remaining, minutes) && !self.is_set(threshold) {
                self.set(threshold);
                fired.push(threshold);
            }
        }
        fired
    }
}

/// A table's active booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub table_number: String,
    pub name: String,
    pub phone: String,
    pub party_size: u32,
    pub start_time: Ms,
    pub end_time: Ms,
    #[serde(default)]
    pub notifications: NotificationLatches,
}

impl Reservation {
    pub fn remaining(&self, now: Ms) -> Ms {
        self.end_time.saturating_sub(now)
    }

    pub fn view(&self, now: Ms) -> ReservationView {
        ReservationView {
            reservation: self.clone(),
            remaining_time: self.remaining(now),
        }
    }

    pub fn is_guest(&self, name: &str, phone: &str) -> bool {
        self.name == name && self.phone == phone
    }
}

/// Registration payload, already validated by intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub table_number: String,
    pub name: String,
    pub phone: String,
    pub party_size: u32,
}

/// Partial update of identity/contact fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_size: Option<u32>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self.table_number.is_none()
            && self.name.is_none()
            && self.phone.is_none()
            && self.party_size.is_none()
    }

    pub fn apply(self, r: &mut Reservation) {
        if let Some(table_number) = self.table_number {
            r.table_number = table_number;
        }
        if let Some(name) = self.name {
            r.name = name;
        }
        if let Some(phone) = self.phone {
            r.phone = phone;
        }
        if let Some(party_size) = self.party_size {
            r.party_size = party_size;
        }
    }
}

// ── Push payloads ────────────────────────────────────────────────

/// A reservation plus its remaining time at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub remaining_time: Ms,
}

/// Full registry state as pushed to viewers. Always replaces, never merges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub taken_at: Ms,
    pub tables: Vec<ReservationView>,
}

impl Snapshot {
    pub fn find(&self, id: &ReservationId) -> Option<&ReservationView> {
        self.tables.iter().find(|v| &v.reservation.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub table_id: ReservationId,
    pub table_number: String,
    pub threshold: Threshold,
    pub message: String,
}

impl Alarm {
    pub fn new(reservation: &Reservation, threshold: Threshold) -> Self {
        Self {
            table_id: reservation.id.clone(),
            table_number: reservation.table_number.clone(),
            threshold,
            message: threshold.message(&reservation.table_number),
        }
    }
}
