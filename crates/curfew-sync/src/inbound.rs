//! # Inbound Command Listener
//!
//! Turns bus commands into desired-state updates and wakes the daemon. The
//! listener never calls the dashboard.
//!
//! ## Command Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  BusCommand {unique_id, payload, sequence}                              │
//! │       │                                                                 │
//! │       ▼  EntityNaming::parse          unknown id ──► ignore             │
//! │  EntityId                                                               │
//! │       │                                                                 │
//! │       ├── block_duration ──► local setting, published back, no sync     │
//! │       │                                                                 │
//! │       ▼  parse_command + expand       bad payload ──► warn, ignore      │
//! │  Vec<DesiredUpdate>  (bulk: one per day, same sequence)                 │
//! │       │                                                                 │
//! │       ▼  one lock, one batch                                            │
//! │  DesiredState ── stale sequences dropped                                │
//! │       │                                                                 │
//! │       ▼  anything applied?                                              │
//! │  trigger.notify_one()  ──►  daemon debounce window                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use curfew_core::validation::BLOCK_DURATION_DEFAULT;
use curfew_core::{expand, Command, CommandValue, DesiredState, EntityId, MinuteGrid, StateValue};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::bus::{Bus, BusCommand, EntityNaming};
use crate::error::SyncResult;

// =============================================================================
// Local Controls
// =============================================================================

/// Settings that live only on the bridge side.
#[derive(Debug)]
pub struct LocalControls {
    block_duration_minutes: AtomicU32,
}

impl Default for LocalControls {
    fn default() -> Self {
        Self {
            block_duration_minutes: AtomicU32::new(BLOCK_DURATION_DEFAULT),
        }
    }
}

impl LocalControls {
    pub fn block_duration_minutes(&self) -> u32 {
        self.block_duration_minutes.load(Ordering::SeqCst)
    }

    /// Clamps to the block-duration grid and stores. Returns the stored value.
    pub fn set_block_duration(&self, minutes: i64) -> u32 {
        let clamped = MinuteGrid::block_duration().clamp(minutes);
        self.block_duration_minutes.store(clamped, Ordering::SeqCst);
        clamped
    }
}

// =============================================================================
// Listener
// =============================================================================

/// What a single command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Desired state changed; a pass was requested.
    Queued { applied: usize, stale: usize },
    /// Every update was older than what is already held.
    Stale,
    /// Handled locally without a sync pass.
    Local,
    /// Not addressed to this child.
    Ignored,
}

pub struct CommandListener {
    naming: EntityNaming,
    bus: Arc<dyn Bus>,
    desired: Arc<Mutex<DesiredState>>,
    controls: Arc<LocalControls>,
    trigger: Arc<Notify>,
}

impl CommandListener {
    pub fn new(
        naming: EntityNaming,
        bus: Arc<dyn Bus>,
        desired: Arc<Mutex<DesiredState>>,
        controls: Arc<LocalControls>,
        trigger: Arc<Notify>,
    ) -> Self {
        Self {
            naming,
            bus,
            desired,
            controls,
            trigger,
        }
    }

    /// Consumes commands until shutdown or until the bus closes the channel.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<BusCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Command listener starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        warn!("Bus command channel closed");
                        break;
                    };
                    let unique_id = command.unique_id.clone();
                    if let Err(e) = self.handle(command).await {
                        warn!(%unique_id, error = %e, "Rejected bus command");
                    }
                }
            }
        }

        info!("Command listener stopped");
    }

    /// Applies one command to desired state.
    pub async fn handle(&self, command: BusCommand) -> SyncResult<CommandOutcome> {
        let Some(entity) = self.naming.parse(&command.unique_id) else {
            debug!(unique_id = %command.unique_id, "Ignoring command for unknown entity");
            return Ok(CommandOutcome::Ignored);
        };

        let value = entity.parse_command(&command.payload)?;

        if entity == EntityId::BlockDuration {
            let requested = match value {
                CommandValue::Number(n) => n,
                _ => return Ok(CommandOutcome::Ignored),
            };
            let stored = self.controls.set_block_duration(requested);
            debug!(requested, stored, "Block duration updated");
            self.bus
                .publish(
                    &self.naming.unique_id(&entity),
                    &StateValue::Number(stored).to_payload(),
                    true,
                )
                .await?;
            return Ok(CommandOutcome::Local);
        }

        let updates = expand(
            &Command {
                entity,
                value,
                sequence: command.sequence,
            },
            self.controls.block_duration_minutes(),
        )?;

        let outcome = self.desired.lock().await.apply_batch(updates)?;
        debug!(
            unique_id = %command.unique_id,
            sequence = command.sequence,
            applied = outcome.applied,
            stale = outcome.stale,
            "Command queued"
        );

        if outcome.applied == 0 {
            return Ok(CommandOutcome::Stale);
        }
        self.trigger.notify_one();
        Ok(CommandOutcome::Queued {
            applied: outcome.applied,
            stale: outcome.stale,
        })
    }
}
