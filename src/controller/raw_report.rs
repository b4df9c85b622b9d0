//! Decoder for vendor input reports carrying the capture button.
//!
//! Full input reports (`0x30`) carry the button bytes after a timer and battery byte,
//! so the capture bit moves by one compared to the short report layouts.

use super::buttons::{ButtonId, BUTTON_CAPTURE};
use super::state_cache::Edge;
use tracing::debug;

const MIN_REPORT_LEN: usize = 6;
const FULL_REPORT_ID: u8 = 0x30;
const CAPTURE_MASK: u8 = 0x20;

/// Extracts the capture bit from a report, or `None` if the report is too short.
pub fn capture_bit(report: &[u8]) -> Option<bool> {
    if report.len() < MIN_REPORT_LEN {
        return None;
    }

    let offset = if report[0] == FULL_REPORT_ID { 3 } else { 2 };
    if report.len() < offset + 2 {
        return None;
    }

    Some(report[offset + 1] & CAPTURE_MASK != 0)
}

/// Turns a stream of reports into capture press/release edges.
#[derive(Debug, Default)]
pub struct CaptureDecoder {
    pressed: bool,
}

impl CaptureDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, report: &[u8]) -> Option<Edge> {
        let Some(pressed) = capture_bit(report) else {
            debug!("Dropping short report ({} bytes)", report.len());
            return None;
        };

        if pressed == self.pressed {
            return None;
        }
        self.pressed = pressed;

        Some(Edge {
            id: ButtonId::from(BUTTON_CAPTURE),
            pressed,
        })
    }

    /// Forgets the last state, returning a release edge if the button was down.
    pub fn reset(&mut self) -> Option<Edge> {
        std::mem::take(&mut self.pressed).then(|| Edge {
            id: ButtonId::from(BUTTON_CAPTURE),
            pressed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_report(capture: bool) -> Vec<u8> {
        let mut report = vec![0u8; 49];
        report[0] = FULL_REPORT_ID;
        if capture {
            report[4] = CAPTURE_MASK;
        }
        report
    }

    #[test]
    fn short_reports_are_dropped() {
        assert_eq!(capture_bit(&[0x30, 0, 0, 0, 0xFF]), None);
        assert_eq!(capture_bit(&[]), None);
    }

    #[test]
    fn full_report_reads_byte_four() {
        assert_eq!(capture_bit(&full_report(true)), Some(true));
        assert_eq!(capture_bit(&full_report(false)), Some(false));
    }

    #[test]
    fn other_reports_read_byte_three() {
        let report = [0x3F, 0x00, 0x00, CAPTURE_MASK, 0x00, 0x00];
        assert_eq!(capture_bit(&report), Some(true));

        // Bit set in the full-report position only
        let report = [0x3F, 0x00, 0x00, 0x00, CAPTURE_MASK, 0x00];
        assert_eq!(capture_bit(&report), Some(false));
    }

    #[test]
    fn other_bits_in_the_byte_are_ignored() {
        let mut report = full_report(false);
        report[4] = !CAPTURE_MASK;
        assert_eq!(capture_bit(&report), Some(false));
    }

    #[test]
    fn decoder_emits_only_edges() {
        let mut decoder = CaptureDecoder::new();

        assert_eq!(decoder.decode(&full_report(false)), None);
        let press = decoder.decode(&full_report(true)).unwrap();
        assert!(press.pressed);
        assert_eq!(press.id.as_str(), BUTTON_CAPTURE);
        assert_eq!(decoder.decode(&full_report(true)), None);
        assert_eq!(decoder.decode(&[0x30, 0x00]), None);

        let release = decoder.decode(&full_report(false)).unwrap();
        assert!(!release.pressed);
    }

    #[test]
    fn reset_releases_a_held_button() {
        let mut decoder = CaptureDecoder::new();
        assert_eq!(decoder.reset(), None);

        decoder.decode(&full_report(true));
        assert_eq!(decoder.reset().map(|e| e.pressed), Some(false));
        assert!(decoder.decode(&full_report(true)).is_some());
    }
}
