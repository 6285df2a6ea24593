//! The combined event loop: one `Node` owns both the Chord engine and the
//! DHash engine and drives them from a single `tokio::select!`, matching
//! the single-threaded cooperative model of `spec.md` §5. This avoids
//! running them as two independently scheduled tasks that would need a
//! channel RPC (or a lock) to call into each other — `dhash::DHashEngine`
//! already expects to borrow `&mut ChordEngine` for its lookups, so one
//! owner suffices.

use std::time::Duration;

use chordnet::ChordEngine;
use corelib::{NodeConfig, Originator};
use dhash::DHashEngine;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};

use crate::command::{hash_key, Command};

/// How often the pooled DHash connections are swept for completed
/// responses (`ConnectionPool::try_pump`'s poll cadence).
const DHASH_PUMP_INTERVAL: Duration = Duration::from_millis(50);
/// How often pending Chord transactions are checked for timeout/retry.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
/// How often the bounded command hand-off slot is polled, per `spec.md` §5.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Node {
    config: NodeConfig,
    chord: ChordEngine,
    dhash: DHashEngine,
    chord_events: broadcast::Receiver<chordnet::Event>,
    /// Set by `Detach`, cleared by `ReAttach`. While set, inbound Chord
    /// datagrams and DHash connections are left unread; periodic timers
    /// keep running, so peers detect the silence as a missed heartbeat
    /// rather than this node explicitly announcing its own absence.
    paused: bool,
}

impl Node {
    pub async fn bind(config: NodeConfig) -> anyhow::Result<Self> {
        let chord = ChordEngine::bind(config.clone()).await?;
        let dhash = DHashEngine::bind(&config).await?;
        let chord_events = chord.subscribe();
        Ok(Self { config, chord, dhash, chord_events, paused: false })
    }

    /// Runs until a `Quit`/`Crash` command arrives or the command source
    /// is closed.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<String>) -> anyhow::Result<()> {
        let mut stabilize_timer = interval(self.config.stabilize_interval);
        stabilize_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = interval(self.config.heartbeat_interval);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fix_finger_timer = interval(self.config.fix_finger_interval);
        fix_finger_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_timer = interval(SWEEP_INTERVAL);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dhash_pump_timer = interval(DHASH_PUMP_INTERVAL);
        dhash_pump_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut audit_timer = interval(self.config.audit_objects_timeout);
        audit_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut command_timer = interval(COMMAND_POLL_INTERVAL);
        command_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                recvd = self.chord.recv_datagram_and_dispatch(), if !self.paused => {
                    if let Err(err) = recvd {
                        tracing::warn!(%err, "chord datagram handling failed");
                    }
                }
                _ = stabilize_timer.tick() => {
                    if let Err(err) = self.chord.stabilize_tick().await {
                        tracing::warn!(%err, "stabilize tick failed");
                    }
                }
                _ = heartbeat_timer.tick() => {
                    if let Err(err) = self.chord.heartbeat_tick().await {
                        tracing::warn!(%err, "heartbeat tick failed");
                    }
                }
                _ = fix_finger_timer.tick() => {
                    if let Err(err) = self.chord.fix_finger_tick().await {
                        tracing::warn!(%err, "fix-finger tick failed");
                    }
                }
                _ = sweep_timer.tick() => {
                    if let Err(err) = self.chord.sweep_transactions().await {
                        tracing::warn!(%err, "transaction sweep failed");
                    }
                }
                accepted = self.dhash.accept_inbound(), if !self.paused => {
                    if let Err(err) = accepted {
                        tracing::warn!(%err, "dhash accept failed");
                    }
                }
                _ = dhash_pump_timer.tick() => {
                    if let Err(err) = self.dhash.pump_tick().await {
                        tracing::warn!(%err, "dhash pump failed");
                    }
                }
                _ = audit_timer.tick() => {
                    if let Err(err) = self.dhash.audit_tick(&mut self.chord).await {
                        tracing::warn!(%err, "dhash audit failed");
                    }
                }
                event = self.chord_events.recv() => {
                    match event {
                        Ok(ev) => {
                            log_chord_event(&ev);
                            if let Err(err) = self.dhash.handle_chord_event(&ev).await {
                                tracing::warn!(%err, "dhash event handling failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "chord event receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }
                _ = command_timer.tick() => {
                    if let Ok(line) = commands.try_recv() {
                        match self.dispatch_line(&line).await {
                            Ok(true) => return Ok(()),
                            Ok(false) => {}
                            Err(err) => tracing::warn!(%err, %line, "command failed"),
                        }
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` when the loop should stop (`Quit`/`Crash`).
    async fn dispatch_line(&mut self, line: &str) -> anyhow::Result<bool> {
        let command = Command::parse(line)?;
        match command {
            Command::InsertVNode { name } => {
                let id = hash_key(&name);
                self.chord.insert_vnode(name, id).await?;
            }
            Command::Lookup { key } => {
                let id = hash_key(&key);
                self.chord.lookup(id, Originator::Application).await?;
            }
            Command::Insert { name, value } => {
                let id = hash_key(&name);
                self.dhash.insert(&mut self.chord, id, value.into_bytes()).await?;
            }
            Command::Retrieve { name } => {
                let id = hash_key(&name);
                self.dhash.retrieve(&mut self.chord, id).await?;
            }
            Command::RemoveVNode { name } => self.chord.remove_vnode(&name).await?,
            Command::TraceRing { name } => self.chord.trace_ring(&name).await?,
            Command::DumpVNodeInfo { name } => match self.chord.vnode_info(&name) {
                Some(info) => tracing::info!(?info, "vnode info"),
                None => tracing::warn!(%name, "no such vnode"),
            },
            Command::DumpDHashInfo => {
                tracing::info!(info = ?self.dhash.dump_info(), "dhash info");
            }
            Command::FixFinger { name } => self.chord.fix_finger_vnode(&name).await?,
            Command::Detach => {
                self.paused = true;
                tracing::info!("detached: inbound i/o paused, timers keep running");
            }
            Command::ReAttach => {
                self.paused = false;
                tracing::info!("reattached: resuming inbound i/o");
            }
            Command::Crash => {
                tracing::warn!("simulated crash: abandoning state without a graceful leave");
                return Ok(true);
            }
            Command::Restart => {
                tracing::info!("restart: dropping all local vnodes and stored objects");
                self.chord.reset();
                self.dhash.reset();
                self.paused = false;
            }
            Command::Quit => return Ok(true),
        }
        Ok(false)
    }
}

fn log_chord_event(event: &chordnet::Event) {
    match event {
        chordnet::Event::JoinSuccess { name, id } => tracing::info!(%name, ?id, "joined ring"),
        chordnet::Event::LookupSuccess { key, ip, app_port } => {
            tracing::info!(?key, %ip, app_port, "lookup succeeded")
        }
        chordnet::Event::LookupFailure { key } => tracing::warn!(?key, "lookup failed"),
        chordnet::Event::ObjectLookupSuccess { key, node } => {
            tracing::debug!(?key, ?node, "object-layer lookup succeeded")
        }
        chordnet::Event::ObjectLookupFailure { key } => {
            tracing::debug!(?key, "object-layer lookup failed")
        }
        chordnet::Event::KeyOwnership { name, self_id, new_pred_id, old_pred_id, .. } => {
            tracing::info!(%name, ?self_id, ?new_pred_id, ?old_pred_id, "predecessor changed")
        }
        chordnet::Event::TraceRing { name, id } => tracing::info!(%name, ?id, "trace ring"),
        chordnet::Event::VNodeFailure { name, id } => tracing::warn!(%name, ?id, "vnode failed"),
    }
}
