use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;
use validator::Validate;

use crate::auth::Actor;
use crate::model::*;
use crate::pricing;
use crate::request::{CarDetails, NewUser, UserUpdate};

use super::{Engine, EngineError, Entity, WalCommand};

fn car_from_details(id: CarId, details: CarDetails) -> Result<Car, EngineError> {
    pricing::check_price(&details.price)?;
    Ok(Car {
        id,
        name: details.name,
        price: details.price,
        specs: details.specs,
        image: details.image,
        transmission: details.transmission,
        fuel: details.fuel,
        capacity: details.capacity,
        engine: details.engine,
        mileage: details.mileage,
        color: details.color,
        availability: details.availability,
    })
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn add_car(&self, actor: &Actor, details: CarDetails) -> Result<CarId, EngineError> {
        actor.require_admin()?;
        details.validate()?;
        let _commit = self.commit_gate.read().await;
        // delete_user must see every car that exists while it holds the account lock
        let _accounts = self.user_lock.lock().await;

        let car = car_from_details(Ulid::new(), details)?;
        let id = car.id;
        let event = Event::CarAdded { car: car.clone() };
        self.wal_append(&event).await?;
        self.store.insert_car(id, Arc::new(RwLock::new(CarState::new(car))));
        info!("car {id} added");
        Ok(id)
    }

    pub async fn update_car(&self, actor: &Actor, car_id: CarId, details: CarDetails) -> Result<(), EngineError> {
        actor.require_admin()?;
        details.validate()?;
        let _commit = self.commit_gate.read().await;

        let car = car_from_details(car_id, details)?;
        let mut guard = self.car_write(car_id).await?;
        let event = Event::CarUpdated { car };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("car {car_id} updated");
        Ok(())
    }

    /// Removes the car together with its bookings and reviews.
    pub async fn delete_car(&self, actor: &Actor, car_id: CarId) -> Result<(), EngineError> {
        actor.require_admin()?;
        let _commit = self.commit_gate.read().await;

        let mut guard = self.car_write(car_id).await?;
        let bookings = guard.bookings.len();
        self.wal_append(&Event::CarDeleted { id: car_id }).await?;
        self.store.remove_car(&mut guard);
        info!("car {car_id} deleted with {bookings} booking(s)");
        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────

    /// Self-service sign-up. Always a customer account.
    pub async fn register_user(&self, new: NewUser) -> Result<UserId, EngineError> {
        self.insert_user(NewUser { is_admin: false, ..new }).await
    }

    pub async fn add_user(&self, actor: &Actor, new: NewUser) -> Result<UserId, EngineError> {
        actor.require_admin()?;
        self.insert_user(new).await
    }

    async fn insert_user(&self, new: NewUser) -> Result<UserId, EngineError> {
        new.validate()?;
        let _commit = self.commit_gate.read().await;
        let _accounts = self.user_lock.lock().await;

        if self.store.user_by_email(&new.email).is_some() {
            return Err(EngineError::AlreadyExists("email already registered"));
        }
        let user = User {
            id: Ulid::new(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            is_admin: new.is_admin,
            created_at: Utc::now(),
        };
        let id = user.id;
        let event = Event::UserRegistered { user };
        self.wal_append(&event).await?;
        self.store.apply_user_event(&event);
        info!("user {id} registered (admin: {})", new.is_admin);
        Ok(id)
    }

    /// Name, email and role. The password hash is left as is.
    pub async fn update_user(&self, actor: &Actor, user_id: UserId, update: UserUpdate) -> Result<(), EngineError> {
        actor.require_admin()?;
        update.validate()?;
        let _commit = self.commit_gate.read().await;
        let _accounts = self.user_lock.lock().await;

        if self.store.user(&user_id).is_none() {
            return Err(EngineError::NotFound(Entity::User, user_id));
        }
        if let Some(owner) = self.store.user_by_email(&update.email)
            && owner != user_id
        {
            return Err(EngineError::AlreadyExists("email already registered"));
        }
        let event = Event::UserUpdated {
            id: user_id,
            name: update.name,
            email: update.email,
            is_admin: update.is_admin,
        };
        self.wal_append(&event).await?;
        self.store.apply_user_event(&event);
        info!("user {user_id} updated");
        Ok(())
    }

    /// Deletes the account with all of its bookings and reviews.
    pub async fn delete_user(&self, actor: &Actor, user_id: UserId) -> Result<(), EngineError> {
        actor.require_admin()?;
        if actor.user_id == user_id {
            return Err(EngineError::Validation("you cannot delete your own account".into()));
        }
        let _commit = self.commit_gate.read().await;
        let _accounts = self.user_lock.lock().await;

        if self.store.user(&user_id).is_none() {
            return Err(EngineError::NotFound(Entity::User, user_id));
        }

        // Lock every car in id order; the user's bookings may be on any of them
        let mut car_ids = self.store.car_ids();
        car_ids.sort();
        let mut guards = Vec::with_capacity(car_ids.len());
        for car_id in car_ids {
            if let Some(cs) = self.store.get_car_state(&car_id) {
                guards.push(cs.write_owned().await);
            }
        }

        let event = Event::UserDeleted { id: user_id };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            self.store.apply_event(guard, &event);
        }
        self.store.apply_user_event(&event);
        info!("user {user_id} deleted");
        Ok(())
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal as the smallest event list that rebuilds the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _commit = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .store
            .users()
            .into_iter()
            .map(|user| Event::UserRegistered { user })
            .collect();

        let mut cars = self.store.car_states();
        let mut snapshot = Vec::with_capacity(cars.len());
        for cs in cars.drain(..) {
            let guard = cs.read().await;
            snapshot.push((guard.car.id, guard.clone()));
        }
        snapshot.sort_by_key(|(id, _)| *id);

        for (_, cs) in snapshot {
            events.push(Event::CarAdded { car: cs.car });
            events.extend(cs.bookings.into_iter().map(|booking| Event::BookingSubmitted { booking }));
            events.extend(cs.reviews.into_iter().map(|review| Event::ReviewSubmitted { review }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!("journal compacted to {count} event(s)");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
