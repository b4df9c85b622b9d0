//! Reader for the vendor HID interface of the controller.
//!
//! The generic controller layer does not expose the capture button, so the reader opens
//! the matching HID interface and decodes the button from raw input reports. On macOS
//! hidapi opens devices exclusively by default, which keeps the system from acting on
//! the reports as well.
//!
//! An absent device is retried until cancelled and a device that fails mid-read is
//! reopened. Only a denied open stops the reader for good.

use super::raw_report::CaptureDecoder;
use super::state_cache::{Edge, EdgeSource};
use super::{sleep_or_cancelled, ButtonReport, SourceRegistration};
use crate::config::CaptureSettings;
use crate::engine::EngineEvent;
use hidapi::{HidApi, HidDevice};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const REPORT_BUFFER_LEN: usize = 64;

// IOKit return codes for a refused exclusive open
const DENIED_MARKERS: [&str; 4] = [
    "0xE00002E2",
    "0xE00002C1",
    "not permitted",
    "not privileged",
];

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to initialize hidapi: {0}")]
    Init(#[source] hidapi::HidError),

    #[error("No HID device matches {vendor_id:04x}:{product_id:04x}")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to open HID device: {0}")]
    Open(String),

    #[error("Access to the HID device was denied: {0}")]
    PermissionDenied(String),

    #[error("HID read failed: {0}")]
    Read(String),

    #[error("Failed to start capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl CaptureError {
    /// Failures that retrying cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied(_))
    }
}

fn open_failure(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if DENIED_MARKERS
        .iter()
        .any(|marker| lower.contains(&marker.to_lowercase()))
    {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::Open(message)
    }
}

/// An open vendor interface.
pub trait ReportDevice {
    /// Reads one input report into `buf`. `Ok(0)` means the timeout elapsed.
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, CaptureError>;
}

/// Finds and opens the vendor interface.
pub trait DeviceOpener {
    fn open(&mut self, settings: &CaptureSettings) -> Result<Box<dyn ReportDevice>, CaptureError>;
}

struct HidReportDevice(HidDevice);

impl ReportDevice for HidReportDevice {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, CaptureError> {
        self.0
            .read_timeout(buf, timeout_ms)
            .map_err(|e| CaptureError::Read(e.to_string()))
    }
}

/// Opener backed by hidapi. The device list is refreshed on every attempt.
#[derive(Default)]
pub struct HidOpener {
    api: Option<HidApi>,
}

impl DeviceOpener for HidOpener {
    fn open(&mut self, settings: &CaptureSettings) -> Result<Box<dyn ReportDevice>, CaptureError> {
        let api = match self.api.take() {
            Some(mut api) => {
                api.refresh_devices().map_err(CaptureError::Init)?;
                api
            }
            None => HidApi::new().map_err(CaptureError::Init)?,
        };
        let result = open_matching(&api, settings);
        self.api = Some(api);
        result
    }
}

fn open_matching(
    api: &HidApi,
    settings: &CaptureSettings,
) -> Result<Box<dyn ReportDevice>, CaptureError> {
    let info = api
        .device_list()
        .find(|info| {
            info.vendor_id() == settings.vendor_id
                && info.product_id() == settings.product_id
                && info.usage_page() == settings.usage_page
                && info.usage() == settings.usage
        })
        .ok_or(CaptureError::NotFound {
            vendor_id: settings.vendor_id,
            product_id: settings.product_id,
        })?;

    info!(
        "Opening HID device {:04x}:{:04x} ({})",
        info.vendor_id(),
        info.product_id(),
        info.product_string().unwrap_or("unknown")
    );
    let device = info
        .open_device(api)
        .map_err(|e| open_failure(e.to_string()))?;
    Ok(Box::new(HidReportDevice(device)))
}

#[state]
#[derive(Debug, Clone)]
pub enum CaptureState {
    Opening,
    Reading,
}

#[machine]
pub struct CaptureReader<S: CaptureState> {
    settings: CaptureSettings,
    opener: Box<dyn DeviceOpener>,

    // Open device, present while Reading
    device: Option<Box<dyn ReportDevice>>,

    decoder: CaptureDecoder,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl CaptureReader<Opening> {
    pub fn create(
        settings: CaptureSettings,
        opener: Box<dyn DeviceOpener>,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(settings, opener, None, CaptureDecoder::new(), events, cancel)
    }

    /// Retries the open until it succeeds. `None` once cancelled or denied.
    pub fn wait_for_device(mut self) -> Option<CaptureReader<Reading>> {
        let mut waiting_logged = false;
        while !self.cancel.is_cancelled() {
            match self.opener.open(&self.settings) {
                Ok(device) => {
                    info!("Capture device opened");
                    self.device = Some(device);
                    return Some(self.transition());
                }
                Err(e) if e.is_permanent() => {
                    error!("Capture button unavailable: {}", e);
                    return None;
                }
                Err(e) if !waiting_logged => {
                    info!("Waiting for capture device: {}", e);
                    waiting_logged = true;
                }
                Err(e) => debug!("Capture device still unavailable: {}", e),
            }

            if sleep_or_cancelled(&self.cancel, self.settings.retry_interval()) {
                break;
            }
        }
        None
    }
}

impl CaptureReader<Reading> {
    /// Reads reports until cancelled, the device fails or the engine stops.
    ///
    /// A device failure hands the reader back for reopening.
    pub fn run_read_loop(mut self) -> Option<CaptureReader<Opening>> {
        let Some(mut device) = self.device.take() else {
            return Some(self.transition());
        };
        info!("Capture reader started");

        let mut buf = [0u8; REPORT_BUFFER_LEN];
        let mut device_failed = false;
        while !self.cancel.is_cancelled() {
            let len = match device.read_report(&mut buf, self.settings.read_timeout_ms) {
                Ok(0) => continue,
                Ok(len) => len,
                Err(e) => {
                    warn!("{}, reopening capture device", e);
                    device_failed = true;
                    break;
                }
            };

            if let Some(edge) = self.decoder.decode(&buf[..len]) {
                debug!("Capture {}", if edge.pressed { "pressed" } else { "released" });
                if !self.forward(edge) {
                    break;
                }
            }
        }

        // Leave no capture press dangling in the engine
        let engine_alive = match self.decoder.reset() {
            Some(edge) => self.forward(edge),
            None => !self.events.is_closed(),
        };

        if device_failed && engine_alive && !self.cancel.is_cancelled() {
            Some(self.transition())
        } else {
            info!("Capture reader stopped");
            None
        }
    }

    fn forward(&self, edge: Edge) -> bool {
        let report = ButtonReport::single(EdgeSource::RawReport, edge.id, edge.pressed);
        self.events.blocking_send(EngineEvent::Buttons(report)).is_ok()
    }
}

fn run_reader(mut reader: CaptureReader<Opening>) {
    loop {
        let Some(reading) = reader.wait_for_device() else {
            return;
        };
        match reading.run_read_loop() {
            Some(opening) => reader = opening,
            None => return,
        }
    }
}

/// Starts the capture thread on hidapi.
pub fn spawn(
    settings: CaptureSettings,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> Result<SourceRegistration, CaptureError> {
    spawn_with(settings, || Box::new(HidOpener::default()), events, cancel)
}

/// Starts the capture thread with the opener built by `opener` on that thread.
pub fn spawn_with<F>(
    settings: CaptureSettings,
    opener: F,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> Result<SourceRegistration, CaptureError>
where
    F: FnOnce() -> Box<dyn DeviceOpener> + Send + 'static,
{
    let thread_cancel = cancel.clone();
    let thread = std::thread::Builder::new()
        .name("padpilot-capture".into())
        .spawn(move || {
            run_reader(CaptureReader::create(settings, opener(), events, thread_cancel));
        })?;

    Ok(SourceRegistration::new("Capture", cancel, thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::buttons::{ButtonId, BUTTON_CAPTURE};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PRESSED: [u8; 6] = [0x30, 0, 0, 0, 0x20, 0];
    const RELEASED: [u8; 6] = [0x30, 0, 0, 0, 0, 0];

    type Read = Result<Vec<u8>, CaptureError>;

    // Plays back reads, then times out forever
    struct ScriptedDevice(VecDeque<Read>);

    impl ReportDevice for ScriptedDevice {
        fn read_report(&mut self, buf: &mut [u8], _: i32) -> Result<usize, CaptureError> {
            match self.0.pop_front() {
                Some(Ok(report)) => {
                    buf[..report.len()].copy_from_slice(&report);
                    Ok(report.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    Ok(0)
                }
            }
        }
    }

    // Plays back open outcomes; absent once exhausted
    struct ScriptedOpener {
        outcomes: VecDeque<Result<Vec<Read>, CaptureError>>,
        attempts: Arc<AtomicUsize>,
    }

    impl DeviceOpener for ScriptedOpener {
        fn open(&mut self, _: &CaptureSettings) -> Result<Box<dyn ReportDevice>, CaptureError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.pop_front() {
                Some(Ok(reads)) => Ok(Box::new(ScriptedDevice(reads.into()))),
                Some(Err(e)) => Err(e),
                None => Err(absent()),
            }
        }
    }

    fn absent() -> CaptureError {
        CaptureError::NotFound {
            vendor_id: 0x057E,
            product_id: 0x2009,
        }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            retry_interval_ms: 1,
            ..CaptureSettings::default()
        }
    }

    fn start(
        outcomes: Vec<Result<Vec<Read>, CaptureError>>,
    ) -> (SourceRegistration, mpsc::Receiver<EngineEvent>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(16);
        let attempts = Arc::new(AtomicUsize::new(0));
        let opener = ScriptedOpener {
            outcomes: outcomes.into(),
            attempts: attempts.clone(),
        };
        let registration = spawn_with(
            settings(),
            move || Box::new(opener),
            tx,
            CancellationToken::new(),
        )
        .unwrap();
        (registration, rx, attempts)
    }

    fn next_capture(rx: &mut mpsc::Receiver<EngineEvent>) -> bool {
        match rx.blocking_recv() {
            Some(EngineEvent::Buttons(report)) => {
                assert_eq!(report.source, EdgeSource::RawReport);
                assert_eq!(report.states.len(), 1);
                assert_eq!(report.states[0].0, ButtonId::from(BUTTON_CAPTURE));
                report.states[0].1
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn late_device_and_reconnect_are_picked_up() {
        let (registration, mut rx, attempts) = start(vec![
            Err(absent()),
            Err(absent()),
            Ok(vec![
                Ok(PRESSED.to_vec()),
                Err(CaptureError::Read("device disconnected".into())),
            ]),
            Err(absent()),
            Ok(vec![Ok(RELEASED.to_vec()), Ok(PRESSED.to_vec())]),
        ]);

        assert!(next_capture(&mut rx));
        // The read error releases the held press before reopening
        assert!(!next_capture(&mut rx));
        assert!(next_capture(&mut rx));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);

        registration.stop();
        // Stopping releases the press still held
        assert!(!next_capture(&mut rx));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn denied_open_stops_for_good() {
        let (registration, mut rx, attempts) = start(vec![Err(open_failure(
            "hid_open_path: (0xE00002E2) (iokit/common) not permitted".into(),
        ))]);

        // The thread exits on its own, dropping its sender
        assert!(rx.blocking_recv().is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        registration.stop();
    }

    #[test]
    fn cancel_while_waiting_stops_retrying() {
        let (registration, mut rx, attempts) = start(Vec::new());
        while attempts.load(Ordering::SeqCst) < 3 {
            std::thread::yield_now();
        }
        registration.stop();
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn open_failures_are_classified() {
        assert!(open_failure("(0xE00002C1) not privileged".into()).is_permanent());
        assert!(open_failure("Operation Not Permitted".into()).is_permanent());
        assert!(!open_failure("device busy".into()).is_permanent());
        assert!(!absent().is_permanent());
        assert!(!CaptureError::Read("gone".into()).is_permanent());
    }
}
