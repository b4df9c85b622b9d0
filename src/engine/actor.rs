//! The engine actor.
//!
//! One tokio task owns every piece of mutable remapping state: the button cache, the
//! shortcut table, the registry, learning mode and the chords currently held down.
//! Button reports, keyboard matches, host commands, the analog tick and the delayed
//! timers are all handled here in arrival order, so none of them can race.

use super::dispatch::{Decision, Dispatcher};
use super::{ButtonEdge, EngineCommand, EngineEvent, EngineStatus};
use crate::config::{ControllerEnabled, EngineSettings};
use crate::controller::analog::{AnalogLoop, ConnectionChange, DeviceProbe, Profile};
use crate::controller::buttons::ButtonId;
use crate::controller::state_cache::Edge;
use crate::controller::ButtonReport;
use crate::inject::{HeldChord, Injector};
use crate::keytap::BindingSnapshot;
use crate::mapping::registry::ButtonRegistry;
use crate::mapping::shortcut::{ShortcutBinding, ShortcutTable};
use crate::persistence::persistence_worker::PersistenceClient;
use std::collections::BTreeMap;
use std::future::poll_fn;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

macro_rules! reply {
    ($reply:expr, $value:expr) => {
        if $reply.send($value).is_err() {
            debug!("Command requester went away");
        }
    };
}

// Scheduled continuation
#[derive(Debug)]
enum Timer {
    ReleaseChord(u64),
    ClearFired(u64),
    ClearMatched(u64),
}

pub(crate) struct Channels {
    pub status: watch::Sender<EngineStatus>,
    pub bindings: watch::Sender<BindingSnapshot>,
    pub edges: broadcast::Sender<ButtonEdge>,
    pub persistence: PersistenceClient,
}

pub(crate) struct RemapEngine {
    settings: EngineSettings,
    enabled: ControllerEnabled,
    profile: Arc<dyn Profile>,
    probe: Box<dyn DeviceProbe>,
    injector: Injector,

    dispatcher: Dispatcher,
    table: ShortcutTable,
    registry: ButtonRegistry,
    analog: AnalogLoop,

    timers: DelayQueue<Timer>,
    held: BTreeMap<u64, HeldChord>,
    next_chord: u64,
    fired_generation: u64,
    matched_generation: u64,

    channels: Channels,
}

impl RemapEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        enabled: ControllerEnabled,
        profile: Arc<dyn Profile>,
        probe: Box<dyn DeviceProbe>,
        injector: Injector,
        table: ShortcutTable,
        registry: ButtonRegistry,
        channels: Channels,
    ) -> Self {
        let analog = AnalogLoop::new(settings.analog.clone());
        Self {
            settings,
            enabled,
            profile,
            probe,
            injector,
            dispatcher: Dispatcher::new(),
            table,
            registry,
            analog,
            timers: DelayQueue::new(),
            held: BTreeMap::new(),
            next_chord: 0,
            fired_generation: 0,
            matched_generation: 0,
            channels,
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(self.settings.analog.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Engine running: {} shortcuts, {} buttons, {:?} tick",
            self.table.len(),
            self.registry.buttons().len(),
            self.settings.analog.poll_interval()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Engine received shutdown signal");
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event),
                Some(command) = commands.recv() => self.handle_command(command),
                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)) => {
                    self.handle_timer(expired.into_inner());
                }
                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.release_all_held();
        info!("Engine stopped");
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Buttons(report) => self.on_report(report),
            EngineEvent::KeyMatched(id) => self.on_key_matched(id),
        }
    }

    fn on_report(&mut self, report: ButtonReport) {
        for (id, pressed) in report.states {
            let Some(edge) = self.dispatcher.observe(&id, pressed) else {
                continue;
            };
            debug!(
                "{} {} ({:?})",
                edge.id,
                if edge.pressed { "pressed" } else { "released" },
                report.source
            );
            // No subscribers is fine
            let _ = self.channels.edges.send(ButtonEdge {
                id: edge.id.clone(),
                pressed: edge.pressed,
                source: report.source,
            });
            self.on_edge(edge);
        }
    }

    fn on_edge(&mut self, edge: Edge) {
        let enabled = self.enabled.is_enabled();
        match self.dispatcher.decide(&edge, enabled, &self.table) {
            Decision::Ignore => {}
            Decision::Detected(_) => self.publish_detection(),
            Decision::Fire(binding) => self.fire(binding),
        }
    }

    fn fire(&mut self, binding: ShortcutBinding) {
        info!("Firing shortcut for {}", binding.button_id);
        if let Some(chord) = self.injector.press_chord(&binding) {
            let id = self.next_chord;
            self.next_chord += 1;
            self.held.insert(id, chord);
            self.timers.insert(
                Timer::ReleaseChord(id),
                self.settings.keyboard.release_delay(),
            );
        }

        self.fired_generation += 1;
        self.timers.insert(
            Timer::ClearFired(self.fired_generation),
            self.settings.feedback.marker_window(),
        );
        self.channels
            .status
            .send_modify(|status| status.last_fired = Some(binding.button_id));
    }

    fn on_key_matched(&mut self, id: ButtonId) {
        debug!("Keyboard matched {}", id);
        self.matched_generation += 1;
        self.timers.insert(
            Timer::ClearMatched(self.matched_generation),
            self.settings.feedback.marker_window(),
        );
        self.channels
            .status
            .send_modify(|status| status.last_matched = Some(id));
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::ReleaseChord(id) => {
                if let Some(chord) = self.held.remove(&id) {
                    self.injector.release_chord(chord);
                }
            }
            Timer::ClearFired(generation) if generation == self.fired_generation => {
                self.channels
                    .status
                    .send_modify(|status| status.last_fired = None);
            }
            Timer::ClearMatched(generation) if generation == self.matched_generation => {
                self.channels
                    .status
                    .send_modify(|status| status.last_matched = None);
            }
            // A newer marker replaced this one
            Timer::ClearFired(_) | Timer::ClearMatched(_) => {}
        }
    }

    fn on_tick(&mut self) {
        let sample = self.probe.probe();
        let enabled = self.enabled.is_enabled();
        if let Some(change) =
            self.analog
                .tick(sample, enabled, &*self.profile, &mut self.injector)
        {
            match change {
                ConnectionChange::Connected => info!("Analog sampling: controller connected"),
                ConnectionChange::Disconnected => info!("Analog sampling: controller disconnected"),
            }
        }

        let connected = self.analog.is_connected();
        let sticks = self.analog.sticks();
        self.channels.status.send_if_modified(|status| {
            let changed = status.connected != connected
                || status.left_stick != sticks.left
                || status.right_stick != sticks.right
                || status.enabled != enabled;
            status.connected = connected;
            status.left_stick = sticks.left;
            status.right_stick = sticks.right;
            status.enabled = enabled;
            changed
        });
    }

    fn release_all_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        info!("Releasing {} held chord(s) before exit", self.held.len());
        for (_, chord) in std::mem::take(&mut self.held) {
            self.injector.release_chord(chord);
        }
        self.timers.clear();
    }

    fn publish_detection(&self) {
        let detection = self.dispatcher.detection().clone();
        self.channels.status.send_modify(|status| {
            status.detecting = detection.active;
            status.detection_message = detection.message;
            status.last_detected = detection.last_detected;
            status.detected_at = detection.detected_at;
        });
    }

    fn shortcuts_changed(&self) {
        let bindings = self.table.bindings();
        self.channels.bindings.send_replace(Arc::new(bindings.to_vec()));
        self.channels.persistence.save_shortcuts(bindings);
    }

    fn buttons_changed(&self) {
        self.channels.persistence.save_buttons(self.registry.buttons());
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::StartDetection { reply } => {
                self.dispatcher.start_detection();
                self.publish_detection();
                reply!(reply, ());
            }
            EngineCommand::StopDetection { reply } => {
                self.dispatcher.stop_detection();
                self.publish_detection();
                reply!(reply, ());
            }
            EngineCommand::RegisterDetected { reply } => {
                let detected = self.dispatcher.detection().last_detected.clone();
                let result = detected.and_then(|button| {
                    self.registry.register(button.clone()).then_some(button)
                });
                if result.is_some() {
                    self.buttons_changed();
                }
                reply!(reply, result);
            }
            EngineCommand::RegisterButton { button, reply } => {
                let added = self.registry.register(button);
                if added {
                    self.buttons_changed();
                }
                reply!(reply, added);
            }
            EngineCommand::RenameButton {
                id,
                display_name,
                reply,
            } => {
                let renamed = self.registry.rename(&id, display_name);
                if renamed {
                    self.buttons_changed();
                }
                reply!(reply, renamed);
            }
            EngineCommand::RemoveButton { id, reply } => {
                let removed = self.registry.remove(&id);
                if removed {
                    info!("Removed button {}", id);
                    self.buttons_changed();
                }
                reply!(reply, removed);
            }
            EngineCommand::ClearCustomButtons { reply } => {
                let cleared = self.registry.clear_custom();
                if cleared {
                    info!("Removed all learned buttons");
                    self.buttons_changed();
                }
                reply!(reply, cleared);
            }
            EngineCommand::Buttons { reply } => {
                reply!(reply, self.registry.buttons().to_vec());
            }
            EngineCommand::UpsertShortcut { binding, reply } => {
                let previous = self.table.upsert(binding);
                self.shortcuts_changed();
                reply!(reply, previous);
            }
            EngineCommand::RemoveShortcut { id, reply } => {
                let removed = self.table.remove(&id);
                if removed.is_some() {
                    self.shortcuts_changed();
                }
                reply!(reply, removed);
            }
            EngineCommand::ReplaceShortcuts { bindings, reply } => {
                self.table.replace_all(bindings);
                info!("Replaced shortcut table ({} bindings)", self.table.len());
                self.shortcuts_changed();
                reply!(reply, ());
            }
            EngineCommand::SetShortcutEnabled { id, enabled, reply } => {
                let found = self.table.set_enabled(&id, enabled);
                if found {
                    self.shortcuts_changed();
                } else {
                    warn!("No shortcut for {} to {}", id, if enabled { "enable" } else { "disable" });
                }
                reply!(reply, found);
            }
            EngineCommand::ClearShortcuts { reply } => {
                self.table.clear();
                info!("Cleared all shortcuts");
                self.shortcuts_changed();
                reply!(reply, ());
            }
            EngineCommand::Shortcut { id, reply } => {
                reply!(reply, self.table.get(&id).cloned());
            }
            EngineCommand::Shortcuts { reply } => {
                reply!(reply, self.table.bindings().to_vec());
            }
            EngineCommand::Sync { reply } => {
                reply!(reply, ());
            }
        }
    }
}

