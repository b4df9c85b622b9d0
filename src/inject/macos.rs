use super::{EventFlags, EventPoster, InjectError, KeyCode, PointerMotion, ScreenPoint};
use super::SYNTHETIC_EVENT_MARKER;
use crate::sys::*;
use std::ptr;

/// Posts events at the HID event tap.
#[derive(Debug, Default)]
pub struct CoreGraphicsPoster;

impl CoreGraphicsPoster {
    fn post(event: &CgEvent) {
        unsafe {
            CGEventSetIntegerValueField(
                event.as_ptr(),
                kCGEventSourceUserData,
                SYNTHETIC_EVENT_MARKER,
            );
            CGEventPost(kCGHIDEventTap, event.as_ptr());
        }
    }
}

impl EventPoster for CoreGraphicsPoster {
    fn post_key(
        &mut self,
        key_code: KeyCode,
        down: bool,
        flags: EventFlags,
    ) -> Result<(), InjectError> {
        let event = CgEvent::from_created(unsafe {
            CGEventCreateKeyboardEvent(ptr::null_mut(), key_code, down)
        })
        .ok_or(InjectError::EventCreation("keyboard"))?;

        unsafe { CGEventSetFlags(event.as_ptr(), flags.bits()) };
        Self::post(&event);
        Ok(())
    }

    fn cursor_position(&mut self) -> Result<ScreenPoint, InjectError> {
        let event = CgEvent::from_created(unsafe { CGEventCreate(ptr::null_mut()) })
            .ok_or(InjectError::CursorPosition)?;
        let location = unsafe { CGEventGetLocation(event.as_ptr()) };
        Ok(ScreenPoint {
            x: location.x,
            y: location.y,
        })
    }

    fn warp_cursor(&mut self, to: ScreenPoint) -> Result<(), InjectError> {
        let result = unsafe { CGWarpMouseCursorPosition(CGPoint { x: to.x, y: to.y }) };
        if result == kCGErrorSuccess {
            Ok(())
        } else {
            Err(InjectError::Warp(result))
        }
    }

    fn post_pointer(
        &mut self,
        motion: PointerMotion,
        at: ScreenPoint,
        dx: i64,
        dy: i64,
    ) -> Result<(), InjectError> {
        let (event_type, button) = match motion {
            PointerMotion::Move => (kCGEventMouseMoved, kCGMouseButtonLeft),
            PointerMotion::LeftDrag => (kCGEventLeftMouseDragged, kCGMouseButtonLeft),
            PointerMotion::RightDrag => (kCGEventRightMouseDragged, kCGMouseButtonRight),
        };

        let event = CgEvent::from_created(unsafe {
            CGEventCreateMouseEvent(
                ptr::null_mut(),
                event_type,
                CGPoint { x: at.x, y: at.y },
                button,
            )
        })
        .ok_or(InjectError::EventCreation("mouse"))?;

        unsafe {
            CGEventSetIntegerValueField(event.as_ptr(), kCGMouseEventDeltaX, dx);
            CGEventSetIntegerValueField(event.as_ptr(), kCGMouseEventDeltaY, dy);
        }
        Self::post(&event);
        Ok(())
    }

    fn post_scroll(&mut self, dx: i32, dy: i32) -> Result<(), InjectError> {
        let event = CgEvent::from_created(unsafe {
            CGEventCreateScrollWheelEvent2(ptr::null_mut(), kCGScrollEventUnitPixel, 2, dy, dx, 0)
        })
        .ok_or(InjectError::EventCreation("scroll"))?;

        Self::post(&event);
        Ok(())
    }
}
