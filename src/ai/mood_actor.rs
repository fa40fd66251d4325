//! Mood actor: serializes every affection/mood mutation through one task.
//!
//! Interactions (touch, chat), the periodic heartbeat tick and explicit mood
//! requests all arrive as messages; readers get the latest [`MoodSnapshot`]
//! from a watch channel without touching the engine.

use super::mood::{InteractionKind, MoodChange, MoodEngine, MoodError, MoodSnapshot};
use crate::utils::shutdown::ShutdownSignal;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

const MAILBOX: usize = 64;

enum MoodCommand {
    Interact {
        kind: InteractionKind,
        reply: oneshot::Sender<(MoodChange, MoodSnapshot)>,
    },
    Tick {
        reply: oneshot::Sender<(MoodChange, MoodSnapshot)>,
    },
    SetMood {
        name: String,
        reply: oneshot::Sender<Result<(bool, MoodSnapshot), MoodError>>,
    },
    RandomUnlocked {
        reply: oneshot::Sender<super::mood::Mood>,
    },
}

#[derive(Clone)]
pub struct MoodHandle {
    commands: mpsc::Sender<MoodCommand>,
    snapshots: watch::Receiver<MoodSnapshot>,
}

impl MoodHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MoodCommand,
    ) -> Result<T, MoodError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MoodError::Stopped)?;
        rx.await.map_err(|_| MoodError::Stopped)
    }

    /// Record a user interaction. Returns the change and the state after it.
    pub async fn record_interaction(
        &self,
        kind: InteractionKind,
    ) -> Result<(MoodChange, MoodSnapshot), MoodError> {
        self.request(|reply| MoodCommand::Interact { kind, reply })
            .await
    }

    /// Run idle decay and idle-driven transitions now.
    pub async fn tick(&self) -> Result<(MoodChange, MoodSnapshot), MoodError> {
        self.request(|reply| MoodCommand::Tick { reply }).await
    }

    pub async fn set_mood(&self, name: &str) -> Result<(bool, MoodSnapshot), MoodError> {
        let name = name.to_string();
        self.request(|reply| MoodCommand::SetMood { name, reply })
            .await?
    }

    pub async fn random_unlocked_mood(&self) -> Result<super::mood::Mood, MoodError> {
        self.request(|reply| MoodCommand::RandomUnlocked { reply })
            .await
    }

    /// Latest published state. `idle_secs` is as of the last mutation.
    pub fn snapshot(&self) -> MoodSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MoodSnapshot> {
        self.snapshots.clone()
    }
}

/// Spawn the mood actor. The RNG is injected so tests can seed it.
pub fn spawn_mood_actor(
    engine: MoodEngine,
    rng: StdRng,
    mut shutdown: ShutdownSignal,
) -> (MoodHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(MAILBOX);
    let (snap_tx, snap_rx) = watch::channel(engine.snapshot(Instant::now()));
    let handle = MoodHandle {
        commands: tx,
        snapshots: snap_rx,
    };

    let task = tokio::spawn(async move {
        let mut engine = engine;
        let mut rng = rng;
        tracing::info!(
            affection = engine.affection(),
            mood = %engine.mood(),
            "mood engine started"
        );

        loop {
            let command = tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
                _ = shutdown.wait() => break,
            };
            let now = Instant::now();

            match command {
                MoodCommand::Interact { kind, reply } => {
                    let change = engine.record_interaction(&kind, now, &mut rng);
                    let snapshot = engine.snapshot(now);
                    snap_tx.send_replace(snapshot.clone());
                    let _ = reply.send((change, snapshot));
                }
                MoodCommand::Tick { reply } => {
                    let change = engine.tick(now);
                    let snapshot = engine.snapshot(now);
                    snap_tx.send_replace(snapshot.clone());
                    let _ = reply.send((change, snapshot));
                }
                MoodCommand::SetMood { name, reply } => {
                    let result = engine.set_mood_by_name(&name).map(|changed| {
                        let snapshot = engine.snapshot(now);
                        snap_tx.send_replace(snapshot.clone());
                        (changed, snapshot)
                    });
                    if let Err(e) = &result {
                        tracing::debug!(requested = %name, error = %e, "mood request refused");
                    }
                    let _ = reply.send(result);
                }
                MoodCommand::RandomUnlocked { reply } => {
                    let _ = reply.send(engine.random_unlocked_mood(&mut rng));
                }
            }
        }
        tracing::debug!("mood actor stopped");
    });

    (handle, task)
}
