//! Engine handle and the messages exchanged with the engine actor.
//!
//! [`EngineHandle::spawn`] wires up the real device sources, the OS injector and the
//! keyboard matcher. [`EngineHandle::spawn_with`] takes the injector backend and stick
//! probe from the caller and starts no OS sources; button reports are then fed through
//! [`EngineHandle::events`].

mod actor;
pub mod dispatch;

use crate::config::{ControllerEnabled, EngineSettings};
use crate::controller::analog::{AnalogSample, DeviceProbe, Profile, WatchProbe};
use crate::controller::buttons::{ButtonId, DetectedButton};
use crate::controller::gamepad::{self, CollectorError};
use crate::controller::hid_capture::{self, CaptureError};
use crate::controller::state_cache::EdgeSource;
use crate::controller::{ButtonReport, SourceRegistration};
use crate::inject::{system_poster, EventPoster, Injector};
use crate::keytap::{BindingSnapshot, KeyTap, KeyboardMatcher};
use crate::mapping::registry::ButtonRegistry;
use crate::mapping::shortcut::{ShortcutBinding, ShortcutTable};
use crate::persistence::persistence_worker::PersistenceWorker;
use crate::persistence::{load_buttons, load_shortcuts, BlobStore};
use actor::{Channels, RemapEngine};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 32;
const EDGE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine has shut down")]
    Stopped,

    #[error("Failed to start gamepad collector: {0}")]
    Collector(#[from] CollectorError),

    #[error("Failed to start capture reader: {0}")]
    Capture(#[from] CaptureError),
}

/// Input delivered to the engine by device sources and the keyboard matcher.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Buttons(ButtonReport),
    KeyMatched(ButtonId),
}

/// A button edge as published to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonEdge {
    pub id: ButtonId,
    pub pressed: bool,
    pub source: EdgeSource,
}

/// Snapshot of engine state for the presentation layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineStatus {
    pub connected: bool,
    pub left_stick: AnalogSample,
    pub right_stick: AnalogSample,
    pub enabled: bool,
    pub detecting: bool,
    pub detection_message: String,
    pub last_detected: Option<DetectedButton>,
    pub detected_at: Option<DateTime<Local>>,
    /// Cleared shortly after the shortcut fired
    pub last_fired: Option<ButtonId>,
    /// Cleared shortly after the keyboard matcher consumed a keystroke
    pub last_matched: Option<ButtonId>,
}

#[derive(Debug)]
pub enum EngineCommand {
    StartDetection {
        reply: oneshot::Sender<()>,
    },
    StopDetection {
        reply: oneshot::Sender<()>,
    },
    RegisterDetected {
        reply: oneshot::Sender<Option<DetectedButton>>,
    },
    RegisterButton {
        button: DetectedButton,
        reply: oneshot::Sender<bool>,
    },
    RenameButton {
        id: ButtonId,
        display_name: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveButton {
        id: ButtonId,
        reply: oneshot::Sender<bool>,
    },
    ClearCustomButtons {
        reply: oneshot::Sender<bool>,
    },
    Buttons {
        reply: oneshot::Sender<Vec<DetectedButton>>,
    },
    UpsertShortcut {
        binding: ShortcutBinding,
        reply: oneshot::Sender<Option<ShortcutBinding>>,
    },
    RemoveShortcut {
        id: ButtonId,
        reply: oneshot::Sender<Option<ShortcutBinding>>,
    },
    ReplaceShortcuts {
        bindings: Vec<ShortcutBinding>,
        reply: oneshot::Sender<()>,
    },
    SetShortcutEnabled {
        id: ButtonId,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    ClearShortcuts {
        reply: oneshot::Sender<()>,
    },
    Shortcut {
        id: ButtonId,
        reply: oneshot::Sender<Option<ShortcutBinding>>,
    },
    Shortcuts {
        reply: oneshot::Sender<Vec<ShortcutBinding>>,
    },
    /// Answers once every earlier message has been handled
    Sync {
        reply: oneshot::Sender<()>,
    },
}

/// Pieces the engine runs with when the caller supplies the OS-facing backends.
pub struct EngineParts<S> {
    pub settings: EngineSettings,
    pub store: S,
    pub profile: Arc<dyn Profile>,
    pub enabled: ControllerEnabled,
    pub poster: Box<dyn EventPoster>,
    pub probe: Box<dyn DeviceProbe>,
}

/// Public interface to a running engine.
///
/// Dropping the handle cancels everything; [`EngineHandle::shutdown`] additionally waits
/// for held keys to be released, threads to exit and pending writes to land.
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: mpsc::Sender<EngineEvent>,
    status: watch::Receiver<EngineStatus>,
    bindings: watch::Receiver<BindingSnapshot>,
    edges: broadcast::Sender<ButtonEdge>,
    enabled: ControllerEnabled,
    cancel: CancellationToken,
    actor: Option<JoinHandle<()>>,
    persistence: Option<PersistenceWorker>,
    sources: Vec<SourceRegistration>,
    key_tap: Option<KeyTap>,
}

impl EngineHandle {
    /// Starts the engine with the gamepad collector, the capture reader (if enabled),
    /// the OS injector and the keyboard matcher (if enabled and permitted).
    pub async fn spawn<S: BlobStore>(
        settings: EngineSettings,
        store: S,
        profile: Arc<dyn Profile>,
        enabled: ControllerEnabled,
    ) -> Result<Self, EngineError> {
        info!("Spawning remapping engine");
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let mut sources = Vec::new();
        let (gamepad, sticks) = gamepad::spawn(events_tx.clone(), cancel.child_token())?;
        sources.push(gamepad);

        if settings.capture.enabled {
            sources.push(hid_capture::spawn(
                settings.capture.clone(),
                events_tx.clone(),
                cancel.child_token(),
            )?);
        } else {
            info!("Capture reader disabled in settings");
        }

        let matcher_enabled = settings.keyboard_matcher.enabled;
        let parts = EngineParts {
            settings,
            store,
            profile,
            enabled,
            poster: system_poster(),
            probe: Box::new(WatchProbe::new(sticks)),
        };
        let mut handle = Self::start(parts, cancel, events_tx, events_rx, sources).await;

        if matcher_enabled {
            let matcher = KeyboardMatcher::new(handle.bindings.clone(), handle.events.clone());
            match KeyTap::install(matcher) {
                Ok(tap) => handle.key_tap = Some(tap),
                Err(e) => warn!("Keyboard matcher inactive: {}", e),
            }
        } else {
            info!("Keyboard matcher disabled in settings");
        }

        Ok(handle)
    }

    /// Starts the engine without any OS sources.
    pub async fn spawn_with<S: BlobStore>(parts: EngineParts<S>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self::start(
            parts,
            CancellationToken::new(),
            events_tx,
            events_rx,
            Vec::new(),
        )
        .await
    }

    async fn start<S: BlobStore>(
        parts: EngineParts<S>,
        cancel: CancellationToken,
        events_tx: mpsc::Sender<EngineEvent>,
        events_rx: mpsc::Receiver<EngineEvent>,
        sources: Vec<SourceRegistration>,
    ) -> Self {
        let (registry, defaults_added) =
            ButtonRegistry::from_persisted(load_buttons(&parts.store).await);
        let table = ShortcutTable::from_bindings(load_shortcuts(&parts.store).await);
        info!(
            "Loaded {} buttons and {} shortcuts",
            registry.buttons().len(),
            table.len()
        );

        let persistence = PersistenceWorker::spawn(parts.store);
        if defaults_added {
            persistence.client().save_buttons(registry.buttons());
        }

        let (status_tx, status_rx) = watch::channel(EngineStatus {
            enabled: parts.enabled.is_enabled(),
            ..EngineStatus::default()
        });
        let (bindings_tx, bindings_rx) = watch::channel(Arc::new(table.bindings().to_vec()));
        let (edges_tx, _) = broadcast::channel(EDGE_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        let engine = RemapEngine::new(
            parts.settings,
            parts.enabled.clone(),
            parts.profile,
            parts.probe,
            Injector::new(parts.poster),
            table,
            registry,
            Channels {
                status: status_tx,
                bindings: bindings_tx,
                edges: edges_tx.clone(),
                persistence: persistence.client(),
            },
        );
        let actor = tokio::spawn(engine.run(events_rx, commands_rx, cancel.clone()));

        Self {
            commands: commands_tx,
            events: events_tx,
            status: status_rx,
            bindings: bindings_rx,
            edges: edges_tx,
            enabled: parts.enabled,
            cancel,
            actor: Some(actor),
            persistence: Some(persistence),
            sources,
            key_tap: None,
        }
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn subscribe_edges(&self) -> broadcast::Receiver<ButtonEdge> {
        self.edges.subscribe()
    }

    /// Latest shortcut table snapshot.
    pub fn bindings(&self) -> watch::Receiver<BindingSnapshot> {
        self.bindings.clone()
    }

    /// Sender for feeding button reports from additional sources.
    pub fn events(&self) -> mpsc::Sender<EngineEvent> {
        self.events.clone()
    }

    pub fn enabled(&self) -> &ControllerEnabled {
        &self.enabled
    }

    pub async fn start_detection(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::StartDetection { reply })
            .await
    }

    pub async fn stop_detection(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::StopDetection { reply })
            .await
    }

    /// Registers the last detected button; `None` if nothing new was registered.
    pub async fn register_detected(&self) -> Result<Option<DetectedButton>, EngineError> {
        self.request(|reply| EngineCommand::RegisterDetected { reply })
            .await
    }

    pub async fn register_button(&self, button: DetectedButton) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::RegisterButton { button, reply })
            .await
    }

    pub async fn rename_button(
        &self,
        id: ButtonId,
        display_name: impl Into<String>,
    ) -> Result<bool, EngineError> {
        let display_name = display_name.into();
        self.request(|reply| EngineCommand::RenameButton {
            id,
            display_name,
            reply,
        })
        .await
    }

    /// Removes a learned button. Built-in buttons are never removed.
    pub async fn remove_button(&self, id: ButtonId) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::RemoveButton { id, reply })
            .await
    }

    pub async fn clear_custom_buttons(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::ClearCustomButtons { reply })
            .await
    }

    pub async fn buttons(&self) -> Result<Vec<DetectedButton>, EngineError> {
        self.request(|reply| EngineCommand::Buttons { reply }).await
    }

    pub async fn upsert_shortcut(
        &self,
        binding: ShortcutBinding,
    ) -> Result<Option<ShortcutBinding>, EngineError> {
        self.request(|reply| EngineCommand::UpsertShortcut { binding, reply })
            .await
    }

    pub async fn remove_shortcut(
        &self,
        id: ButtonId,
    ) -> Result<Option<ShortcutBinding>, EngineError> {
        self.request(|reply| EngineCommand::RemoveShortcut { id, reply })
            .await
    }

    pub async fn replace_shortcuts(
        &self,
        bindings: Vec<ShortcutBinding>,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::ReplaceShortcuts { bindings, reply })
            .await
    }

    pub async fn set_shortcut_enabled(
        &self,
        id: ButtonId,
        enabled: bool,
    ) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::SetShortcutEnabled { id, enabled, reply })
            .await
    }

    pub async fn clear_shortcuts(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::ClearShortcuts { reply })
            .await
    }

    pub async fn shortcut(&self, id: ButtonId) -> Result<Option<ShortcutBinding>, EngineError> {
        self.request(|reply| EngineCommand::Shortcut { id, reply })
            .await
    }

    pub async fn shortcuts(&self) -> Result<Vec<ShortcutBinding>, EngineError> {
        self.request(|reply| EngineCommand::Shortcuts { reply })
            .await
    }

    /// Waits until every mutation issued so far has been written to the store.
    pub async fn flush_persistence(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Sync { reply }).await?;
        match &self.persistence {
            Some(worker) => {
                worker.client().flush().await;
                Ok(())
            }
            None => Err(EngineError::Stopped),
        }
    }

    /// Stops the engine: held keys are released, source threads joined and pending
    /// writes flushed. No source callback runs after this returns.
    pub async fn shutdown(mut self) {
        info!("Shutting down engine");
        self.cancel.cancel();

        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                error!("Engine task failed: {}", e);
            }
        }

        let sources = std::mem::take(&mut self.sources);
        let key_tap = self.key_tap.take();
        let joined = tokio::task::spawn_blocking(move || {
            if let Some(tap) = key_tap {
                tap.stop();
            }
            for source in sources {
                source.stop();
            }
        })
        .await;
        if let Err(e) = joined {
            error!("Failed to join source threads: {}", e);
        }

        if let Some(persistence) = self.persistence.take() {
            persistence.finish().await;
        }
        info!("Engine shut down");
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
