//! Pointer motion and scrolling.
//!
//! A move warps the cursor to the new absolute position and then posts a relative event
//! carrying the same delta, so applications that read either see consistent motion.

use super::{InjectError, Injector, PointerMotion, ScreenPoint};
use tracing::trace;

impl Injector {
    pub fn move_cursor(&mut self, dx: f64, dy: f64) -> Result<(), InjectError> {
        self.move_with(PointerMotion::Move, dx, dy)
    }

    pub fn move_cursor_while_left_held(&mut self, dx: f64, dy: f64) -> Result<(), InjectError> {
        self.move_with(PointerMotion::LeftDrag, dx, dy)
    }

    pub fn move_cursor_while_right_held(&mut self, dx: f64, dy: f64) -> Result<(), InjectError> {
        self.move_with(PointerMotion::RightDrag, dx, dy)
    }

    /// Scrolls by whole pixels. Positive `dy` scrolls content down.
    pub fn scroll(&mut self, dx: f64, dy: f64) -> Result<(), InjectError> {
        if dx == 0.0 && dy == 0.0 {
            return Ok(());
        }
        trace!("Scroll by ({}, {})", dx, dy);
        self.poster.post_scroll(dx as i32, dy as i32)
    }

    fn move_with(&mut self, motion: PointerMotion, dx: f64, dy: f64) -> Result<(), InjectError> {
        if dx == 0.0 && dy == 0.0 {
            return Ok(());
        }

        let current = self.poster.cursor_position()?;
        let target = ScreenPoint {
            x: current.x + dx,
            y: current.y + dy,
        };
        self.poster.warp_cursor(target)?;
        trace!("{:?} by ({:.2}, {:.2}) to {:?}", motion, dx, dy, target);
        self.poster
            .post_pointer(motion, target, dx as i64, dy as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::testing::{Posted, RecordingPoster};

    #[test]
    fn zero_delta_posts_nothing() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        injector.move_cursor(0.0, 0.0).unwrap();
        injector.move_cursor_while_left_held(0.0, 0.0).unwrap();
        injector.move_cursor_while_right_held(0.0, 0.0).unwrap();
        injector.scroll(0.0, 0.0).unwrap();

        assert!(poster.events().is_empty());
    }

    #[test]
    fn move_warps_then_posts_truncated_delta() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        injector.move_cursor(4.8, -2.5).unwrap();

        let target = ScreenPoint { x: 4.8, y: -2.5 };
        assert_eq!(
            poster.events(),
            vec![
                Posted::Warp(target),
                Posted::Pointer {
                    motion: PointerMotion::Move,
                    at: target,
                    dx: 4,
                    dy: -2
                }
            ]
        );
    }

    #[test]
    fn drag_variant_follows_held_button() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        injector.move_cursor_while_left_held(1.0, 0.0).unwrap();
        injector.move_cursor_while_right_held(0.0, 1.0).unwrap();

        let motions: Vec<_> = poster
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Posted::Pointer { motion, .. } => Some(motion),
                _ => None,
            })
            .collect();
        assert_eq!(motions, [PointerMotion::LeftDrag, PointerMotion::RightDrag]);
    }

    #[test]
    fn moves_accumulate_from_current_position() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        injector.move_cursor(10.0, 5.0).unwrap();
        injector.move_cursor(-3.0, 1.0).unwrap();

        assert_eq!(
            poster.events().last(),
            Some(&Posted::Pointer {
                motion: PointerMotion::Move,
                at: ScreenPoint { x: 7.0, y: 6.0 },
                dx: -3,
                dy: 1
            })
        );
    }

    #[test]
    fn scroll_posts_both_axes() {
        let poster = RecordingPoster::new();
        let mut injector = Injector::new(Box::new(poster.clone()));

        injector.scroll(2.0, -5.0).unwrap();
        assert_eq!(poster.events(), vec![Posted::Scroll { dx: 2, dy: -5 }]);
    }
}
