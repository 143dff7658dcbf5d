//! # Schema Update Relay
//!
//! Bridges the per-station control subject `schema-updates.<station>` into a
//! typed event ring that the produce pipeline drains before validating.
//!
//! ## Registration
//! One relay per station and connection, reference counted: the first
//! producer subscribes and spawns the relay task, later producers on the same
//! station attach to it, and the last removal cancels the task and the
//! subscription. Every station key owns its own async mutex inside a
//! `DashMap`, so work on one station never waits on another. A station's map
//! entry is dropped together with its last listener.
//!
//! If the transport ends a relay's subscription while still connected, the
//! task stops on its own. The next registration on that station subscribes
//! again and restarts the task on the same ring, and removal treats the
//! vanished subscription as already cancelled. Updates pushed while no task
//! was running are lost.
//!
//! ## Buffering
//! Events go into a `broadcast` ring with one receiver retained from the
//! moment of registration, so the creation-time snapshot and every later
//! update stay queued until drained. Sending never blocks the relay task.
//! When more than `capacity` events are pending, the oldest are discarded;
//! the next drain logs how many were lost. The underlying channel rounds its
//! size up to a power of two, so the exact bound is applied at drain time.
//!
//! ## Ordering
//! The relay task sends without taking the station lock. An update forwarded
//! by the task is therefore ordered only against other forwarded updates, not
//! against events enqueued through [`SchemaRelayRegistry::push`]: one that
//! arrives while a producer's creation reply is in flight can land ahead of
//! the snapshot from that reply.
//!
//! ## Schema state
//! Draining applies the newest event to the station's [`SchemaState`]. Events
//! are never merged: the last one wins.

use crate::schema::SchemaUpdate;
use crate::subjects::{internal_station_name, schema_updates_subject};
use crate::validation::{SchemaState, ValidatorRegistry};
use crate::{ProducerError, ProducerResult};
use dashmap::DashMap;
use network::{Subscription, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of undrained schema events kept per station
pub const DEFAULT_SCHEMA_UPDATE_CAPACITY: usize = 256;

type StationSlot = Arc<Mutex<Option<StationRelay>>>;

/// Why a relay task returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayExit {
    /// Stopped on request; its subscription was cancelled
    Shutdown,
    /// The transport ended the subscription; nothing left to cancel
    SubscriptionEnded,
}

struct StationRelay {
    sender: broadcast::Sender<SchemaUpdate>,
    pending: broadcast::Receiver<SchemaUpdate>,
    capacity: usize,
    current: SchemaState,
    listeners: usize,
    dropped: u64,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<network::Result<RelayExit>>,
}

impl StationRelay {
    fn drain(&mut self, station: &str, validators: &ValidatorRegistry) -> Vec<SchemaUpdate> {
        let mut drained = Vec::new();
        let mut skipped_total = 0u64;
        loop {
            match self.pending.try_recv() {
                Ok(update) => drained.push(update),
                Err(TryRecvError::Lagged(skipped)) => skipped_total += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if drained.len() > self.capacity {
            let excess = drained.len() - self.capacity;
            drained.drain(..excess);
            skipped_total += excess as u64;
        }
        if skipped_total > 0 {
            self.dropped += skipped_total;
            warn!(
                station,
                skipped = skipped_total,
                "Schema update ring overflowed, oldest events dropped"
            );
        }

        if let Some(latest) = drained.last() {
            self.current = validators.resolve(latest);
            debug!(station, events = drained.len(), "Applied schema updates");
        }
        drained
    }
}

/// Connection-wide map of station -> schema update relay
pub struct SchemaRelayRegistry {
    transport: Arc<dyn Transport>,
    validators: Arc<ValidatorRegistry>,
    capacity: usize,
    stations: DashMap<String, StationSlot>,
}

impl SchemaRelayRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        validators: Arc<ValidatorRegistry>,
        capacity: usize,
    ) -> Self {
        Self {
            transport,
            validators,
            capacity: capacity.max(1),
            stations: DashMap::new(),
        }
    }

    fn slot(&self, station: &str) -> StationSlot {
        self.stations
            .entry(internal_station_name(station))
            .or_default()
            .value()
            .clone()
    }

    fn existing_slot(&self, station: &str) -> Option<StationSlot> {
        self.stations
            .get(&internal_station_name(station))
            .map(|slot| Arc::clone(slot.value()))
    }

    fn is_mapped(&self, station: &str, slot: &StationSlot) -> bool {
        self.stations
            .get(&internal_station_name(station))
            .is_some_and(|mapped| Arc::ptr_eq(mapped.value(), slot))
    }

    /// Drop the station's map entry if it still points at `slot`.
    /// Call with the slot's lock held and the slot emptied.
    fn release_slot(&self, station: &str, slot: &StationSlot) {
        self.stations
            .remove_if(&internal_station_name(station), |_, mapped| {
                Arc::ptr_eq(mapped, slot)
            });
    }

    async fn spawn_relay(
        &self,
        station: &str,
        sender: broadcast::Sender<SchemaUpdate>,
    ) -> ProducerResult<(oneshot::Sender<()>, JoinHandle<network::Result<RelayExit>>)> {
        let subscription = self
            .transport
            .subscribe(&schema_updates_subject(station))
            .await?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_relay(
            station.to_string(),
            subscription,
            sender,
            shutdown_rx,
            Arc::clone(&self.transport),
        ));
        Ok((shutdown, task))
    }

    /// Ensure a relay exists for `station` and count one more listener.
    ///
    /// Returns the listener count after registration.
    pub async fn listen(&self, station: &str) -> ProducerResult<usize> {
        loop {
            let slot = self.slot(station);
            let mut guard = slot.lock().await;

            // A concurrent removal released this slot while we waited for it
            if guard.is_none() && !self.is_mapped(station, &slot) {
                continue;
            }

            if let Some(relay) = guard.as_mut() {
                if relay.task.is_finished() {
                    self.restart(station, relay).await?;
                }
                relay.listeners += 1;
                debug!(
                    station,
                    listeners = relay.listeners,
                    "Attached to existing schema update relay"
                );
                return Ok(relay.listeners);
            }

            let (sender, pending) = broadcast::channel(self.capacity);
            let (shutdown, task) = match self.spawn_relay(station, sender.clone()).await {
                Ok(spawned) => spawned,
                Err(e) => {
                    self.release_slot(station, &slot);
                    return Err(e);
                }
            };

            *guard = Some(StationRelay {
                sender,
                pending,
                capacity: self.capacity,
                current: SchemaState::None,
                listeners: 1,
                dropped: 0,
                shutdown,
                task,
            });

            info!(station, subject = %schema_updates_subject(station), "Schema update relay registered");
            return Ok(1);
        }
    }

    /// Resubscribe a relay whose task already stopped, keeping its ring and state
    async fn restart(&self, station: &str, relay: &mut StationRelay) -> ProducerResult<()> {
        let (shutdown, task) = self.spawn_relay(station, relay.sender.clone()).await?;
        relay.shutdown = shutdown;
        let stopped = std::mem::replace(&mut relay.task, task);

        match stopped.await {
            Ok(Ok(exit)) => {
                warn!(station, ?exit, "Schema update relay had stopped, resubscribed")
            }
            Ok(Err(e)) => {
                warn!(station, error = %e, "Schema update relay had failed, resubscribed")
            }
            Err(e) => warn!(station, error = %e, "Schema update relay task had died, resubscribed"),
        }
        Ok(())
    }

    /// Drop one listener; the last one cancels the subscription.
    ///
    /// Fails with `NoActiveListener` when no relay exists for `station`.
    pub async fn remove(&self, station: &str) -> ProducerResult<()> {
        let slot = self
            .existing_slot(station)
            .ok_or_else(|| ProducerError::no_active_listener(station))?;
        let mut guard = slot.lock().await;

        let relay = guard
            .as_mut()
            .ok_or_else(|| ProducerError::no_active_listener(station))?;
        if relay.listeners > 1 {
            relay.listeners -= 1;
            debug!(
                station,
                listeners = relay.listeners,
                "Detached from schema update relay"
            );
            return Ok(());
        }

        let Some(relay) = guard.take() else {
            return Err(ProducerError::no_active_listener(station));
        };
        self.release_slot(station, &slot);
        drop(guard);

        // The task may already have exited if its subscription ended
        let _ = relay.shutdown.send(());

        match relay.task.await {
            Ok(Ok(RelayExit::Shutdown)) => {
                info!(station, "Schema update relay removed");
                Ok(())
            }
            Ok(Ok(RelayExit::SubscriptionEnded)) => {
                info!(station, "Schema update relay removed, subscription had already ended");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(station, error = %e, "Schema update relay removed with transport error");
                Err(e.into())
            }
            Err(e) => Err(ProducerError::RelayTask {
                station: station.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Enqueue an event as if the control plane had pushed it
    pub async fn push(&self, station: &str, update: SchemaUpdate) -> ProducerResult<()> {
        let slot = self
            .existing_slot(station)
            .ok_or_else(|| ProducerError::no_active_listener(station))?;
        let guard = slot.lock().await;
        let relay = guard
            .as_ref()
            .ok_or_else(|| ProducerError::no_active_listener(station))?;

        // The retained receiver keeps the channel open
        let _ = relay.sender.send(update);
        Ok(())
    }

    /// Take every pending event in arrival order, applying the newest to the station state
    pub async fn drain(&self, station: &str) -> ProducerResult<Vec<SchemaUpdate>> {
        let slot = self
            .existing_slot(station)
            .ok_or_else(|| ProducerError::no_active_listener(station))?;
        let mut guard = slot.lock().await;
        let relay = guard
            .as_mut()
            .ok_or_else(|| ProducerError::no_active_listener(station))?;

        Ok(relay.drain(station, &self.validators))
    }

    /// Current schema state after applying all pending events
    pub async fn schema_state(&self, station: &str) -> ProducerResult<SchemaState> {
        let slot = self
            .existing_slot(station)
            .ok_or_else(|| ProducerError::no_active_listener(station))?;
        let mut guard = slot.lock().await;
        let relay = guard
            .as_mut()
            .ok_or_else(|| ProducerError::no_active_listener(station))?;

        relay.drain(station, &self.validators);
        Ok(relay.current.clone())
    }

    /// Number of producers attached to the station's relay (0 when none)
    pub async fn listener_count(&self, station: &str) -> usize {
        match self.existing_slot(station) {
            Some(slot) => slot.lock().await.as_ref().map_or(0, |r| r.listeners),
            None => 0,
        }
    }

    /// Events lost to ring overflow since registration
    pub async fn dropped_events(&self, station: &str) -> u64 {
        match self.existing_slot(station) {
            Some(slot) => slot.lock().await.as_ref().map_or(0, |r| r.dropped),
            None => 0,
        }
    }
}

impl std::fmt::Debug for SchemaRelayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRelayRegistry")
            .field("capacity", &self.capacity)
            .field("stations", &self.stations.len())
            .finish()
    }
}

async fn run_relay(
    station: String,
    mut subscription: Subscription,
    sender: broadcast::Sender<SchemaUpdate>,
    mut shutdown: oneshot::Receiver<()>,
    transport: Arc<dyn Transport>,
) -> network::Result<RelayExit> {
    let mut relayed = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            message = subscription.next() => {
                let Some(message) = message else {
                    warn!(station = %station, relayed, "Schema update subscription ended");
                    if !transport.is_connected() {
                        return Err(TransportError::Closed);
                    }
                    return Ok(RelayExit::SubscriptionEnded);
                };
                match SchemaUpdate::decode(&message.payload) {
                    Ok(update) => {
                        relayed += 1;
                        let _ = sender.send(update);
                    }
                    Err(e) => {
                        warn!(station = %station, error = %e, "Discarding undecodable schema update");
                    }
                }
            }
        }
    }

    debug!(station = %station, relayed, "Schema update relay stopping");
    transport.unsubscribe(subscription.id()).await?;
    Ok(RelayExit::Shutdown)
}
