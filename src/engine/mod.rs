mod bookings;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::{Entity, EngineError};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::model::*;
use crate::payment::{PaymentGateway, SimulatedGateway};
use crate::wal::Wal;

pub type SharedCarState = Arc<RwLock<CarState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that are already queued when one arrives are
/// written with it and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush what we have before compaction sees the file
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal flush of {} event(s) failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: a failed batch is cut back off the journal, since every
/// caller in it is told the write failed.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("journal rollback failed, appends refused until compaction: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            if result.is_ok() {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking engine. Share it as `Arc<Engine>`; every operation takes `&self`.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) payments: Arc<dyn PaymentGateway>,
    /// Serializes account changes so the email uniqueness check and the write agree.
    /// Car additions take it too, so a user deletion sees a stable set of cars.
    pub(super) user_lock: Mutex<()>,
    /// Mutations hold it shared from check to apply; compaction holds it exclusively
    /// so its snapshot never misses an event that is durable but not yet applied.
    pub(super) commit_gate: RwLock<()>,
}

fn replay_conflict() -> io::Error {
    io::Error::other("journal replay found a locked car state")
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_gateway(wal_path, Arc::new(SimulatedGateway))
    }

    pub fn with_gateway(wal_path: PathBuf, payments: Arc<dyn PaymentGateway>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            tracing::warn!(
                "journal {} ends in a damaged record; replayed {} event(s) before it",
                wal_path.display(),
                replay.events.len()
            );
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            payments,
            user_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };
        for event in &replay.events {
            engine.replay_event(event)?;
        }
        tracing::debug!(
            "replayed {} event(s): {} car(s), {} booking(s)",
            replay.events.len(),
            engine.store.car_count(),
            engine.store.booking_count()
        );
        Ok(engine)
    }

    /// Replay runs before the engine is shared, so every lock is free and
    /// `try_write` always succeeds.
    fn replay_event(&self, event: &Event) -> io::Result<()> {
        match event {
            Event::CarAdded { car } => {
                self.store
                    .insert_car(car.id, Arc::new(RwLock::new(CarState::new(car.clone()))));
            }
            Event::CarDeleted { id } => {
                if let Some(cs) = self.store.get_car_state(id) {
                    let mut guard = cs.try_write().map_err(|_| replay_conflict())?;
                    self.store.remove_car(&mut guard);
                }
            }
            Event::UserRegistered { .. } | Event::UserUpdated { .. } => {
                self.store.apply_user_event(event);
            }
            Event::UserDeleted { .. } => {
                for cs in self.store.car_states() {
                    let mut guard = cs.try_write().map_err(|_| replay_conflict())?;
                    self.store.apply_event(&mut guard, event);
                }
                self.store.apply_user_event(event);
            }
            other => {
                if let Some(car_id) = other.car_id()
                    && let Some(cs) = self.store.get_car_state(&car_id)
                {
                    let mut guard = cs.try_write().map_err(|_| replay_conflict())?;
                    self.store.apply_event(&mut guard, other);
                }
            }
        }
        Ok(())
    }

    /// Durably journal one event via the group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Journal, then apply to the locked car. Nothing changes in memory if the append fails.
    pub(super) async fn persist_and_apply(&self, cs: &mut CarState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(cs, event);
        Ok(())
    }

    /// Write-lock a car, checking it was not deleted while we waited.
    pub(super) async fn car_write(&self, car_id: CarId) -> Result<OwnedRwLockWriteGuard<CarState>, EngineError> {
        let cs = self
            .store
            .get_car_state(&car_id)
            .ok_or(EngineError::NotFound(Entity::Car, car_id))?;
        let guard = cs.write_owned().await;
        if !self.store.contains_car(&car_id) {
            return Err(EngineError::NotFound(Entity::Car, car_id));
        }
        Ok(guard)
    }

    /// Booking → car lookup, then the car's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<CarState>, EngineError> {
        let car_id = self
            .store
            .car_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let guard = self.car_write(car_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(Entity::Booking, booking_id));
        }
        Ok(guard)
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }
}
