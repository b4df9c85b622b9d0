//! Engine settings and the shared "controller enabled" toggle.
//!
//! Settings live in `~/.config/padpilot/settings.toml`. Every field has a default, so a
//! missing file or a partial file is fine; only unparsable TOML is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/padpilot";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level settings for the remapping engine.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub analog: AnalogSettings,
    pub keyboard: KeyboardSettings,
    pub feedback: FeedbackSettings,
    pub capture: CaptureSettings,
    pub keyboard_matcher: MatcherSettings,
}

/// Analog sampling loop tuning.
///
/// The sampling interval doubles as the device enumeration poll. The defaults give a
/// 200 Hz loop, a 10% per-axis deadzone and a pointer that covers roughly 6 points per
/// tick at full deflection with the default sensitivity.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AnalogSettings {
    /// Sampling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Per-axis deadzone; axis values with a smaller magnitude are forced to zero
    pub deadzone: f32,

    /// Sensitivity used for both sticks until a profile overrides it
    pub default_sensitivity: f32,

    pub pointer_multiplier_x: f32,
    pub pointer_multiplier_y: f32,
    pub scroll_multiplier_x: f32,
    pub scroll_multiplier_y: f32,

    pub invert_scroll_vertical: bool,
    pub invert_scroll_horizontal: bool,
}

impl Default for AnalogSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            deadzone: 0.1,
            default_sensitivity: 10.0,
            pointer_multiplier_x: 0.6,
            pointer_multiplier_y: 0.6,
            scroll_multiplier_x: 1.0,
            scroll_multiplier_y: 1.0,
            invert_scroll_vertical: false,
            invert_scroll_horizontal: false,
        }
    }
}

impl AnalogSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct KeyboardSettings {
    /// Delay between the primary key-down and the release of the whole chord
    pub release_delay_ms: u64,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            release_delay_ms: 50,
        }
    }
}

impl KeyboardSettings {
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FeedbackSettings {
    /// How long "last fired" / "last matched" markers stay visible
    pub marker_window_ms: u64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            marker_window_ms: 300,
        }
    }
}

impl FeedbackSettings {
    pub fn marker_window(&self) -> Duration {
        Duration::from_millis(self.marker_window_ms)
    }
}

/// Vendor HID reader used for the capture button.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub enabled: bool,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub read_timeout_ms: i32,
    /// Delay between attempts to open an absent device
    pub retry_interval_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            vendor_id: 0x057E,  // Nintendo
            product_id: 0x2009, // Switch Pro Controller
            usage_page: 0x01,   // Generic Desktop
            usage: 0x05,        // Game Pad
            read_timeout_ms: 50,
            retry_interval_ms: 1000,
        }
    }
}

impl CaptureSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MatcherSettings {
    /// The matcher consumes matching keystrokes system-wide, so it is opt-in
    pub enabled: bool,
}

impl EngineSettings {
    /// Directory holding settings and persisted blobs.
    pub fn config_dir() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join(SETTINGS_FILE)
    }

    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub async fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            info!(
                "No settings file at {}, using default settings",
                path.display()
            );
            return Ok(Self::default());
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let settings = Self::parse(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded settings from {}: {:?}", path.display(), settings);
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

/// Global on/off switch for injection, shared between the host and the engine.
///
/// While disabled the engine keeps sampling and tracking button state, but nothing is
/// injected, so re-enabling takes effect on the next tick.
#[derive(Clone, Debug)]
pub struct ControllerEnabled(Arc<AtomicBool>);

impl ControllerEnabled {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        info!("Controller {}", if enabled { "enabled" } else { "disabled" });
        self.0.store(enabled, Ordering::Release);
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self) -> bool {
        let enabled = !self.0.fetch_xor(true, Ordering::AcqRel);
        info!("Controller {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }
}

impl Default for ControllerEnabled {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = EngineSettings::parse("").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.analog.poll_interval(), Duration::from_millis(5));
        assert_eq!(settings.keyboard.release_delay(), Duration::from_millis(50));
        assert!(!settings.keyboard_matcher.enabled);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings = EngineSettings::parse(
            r#"
            [analog]
            deadzone = 0.2
            invert_scroll_vertical = true

            [capture]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.analog.deadzone, 0.2);
        assert!(settings.analog.invert_scroll_vertical);
        assert_eq!(settings.analog.pointer_multiplier_x, 0.6);
        assert!(!settings.capture.enabled);
        assert_eq!(settings.capture.vendor_id, 0x057E);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(EngineSettings::parse("analog = [").is_err());
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("padpilot-does-not-exist/settings.toml");
        let settings = EngineSettings::load_from(&path).await.unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn toggle_flips_shared_flag() {
        let enabled = ControllerEnabled::new(true);
        let shared = enabled.clone();
        assert!(!enabled.toggle());
        assert!(!shared.is_enabled());
        shared.set(true);
        assert!(enabled.is_enabled());
    }
}
