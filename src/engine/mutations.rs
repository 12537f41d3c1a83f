use tracing::{debug, info};

use crate::model::*;

use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Open a reservation for `new.table_number` starting now.
    pub async fn register(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let mut store = self.store.lock().await;
        let reservation = store.register(new, now_ms(), self.duration)?;
        info!(
            "registered table {} for {} ({} guests), id {}",
            reservation.table_number, reservation.name, reservation.party_size, reservation.id
        );
        self.commit(store).await;
        Ok(reservation)
    }

    /// Remove a reservation. Returns the removed record; unknown ids are a no-op.
    pub async fn delete(&self, id: &ReservationId) -> Option<Reservation> {
        let mut store = self.store.lock().await;
        let removed = store.delete(id);
        match removed {
            Ok(removed) => {
                info!("deleted table {} (id {id})", removed.table_number);
                self.commit(store).await;
                Some(removed)
            }
            Err(e) => {
                debug!("delete skipped: {e}");
                None
            }
        }
    }

    /// Shift the end time by `delta_minutes` and clear all alarm latches.
    /// Unknown ids are a no-op.
    pub async fn adjust_time(&self, id: &ReservationId, delta_minutes: i64) -> Option<Reservation> {
        let mut store = self.store.lock().await;
        let adjusted = store.adjust_time(id, delta_minutes);
        match adjusted {
            Ok(updated) => {
                info!(
                    "adjusted table {} by {delta_minutes:+} min, ends at {}",
                    updated.table_number, updated.end_time
                );
                self.commit(store).await;
                Some(updated)
            }
            Err(e) => {
                debug!("adjust skipped: {e}");
                None
            }
        }
    }

    /// Apply `patch` to the identity/contact fields. `Ok(None)` for an unknown id.
    pub async fn edit(
        &self,
        id: &ReservationId,
        patch: ReservationPatch,
    ) -> Result<Option<Reservation>, EngineError> {
        let mut store = self.store.lock().await;
        let edited = store.edit(id, patch);
        match edited {
            Ok(updated) => {
                info!("edited table {} (id {id})", updated.table_number);
                self.commit(store).await;
                Ok(Some(updated))
            }
            Err(EngineError::NotFound(_)) => {
                debug!("edit skipped: unknown id {id}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
