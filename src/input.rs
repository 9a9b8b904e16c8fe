use winit::event::{DeviceEvent, ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Platform-neutral input event consumed by the camera and the app loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    /// Raw relative mouse motion, in device units.
    MouseMotion { dx: f32, dy: f32 },
    Resized { width: u32, height: u32 },
    CloseRequested,
}

impl InputEvent {
    /// Translate a window event. Returns `None` for events the viewer ignores.
    ///
    /// Key repeats are dropped so a held key produces exactly one `KeyDown`.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                Self::from_key(event.physical_key, event.state, event.repeat)
            }
            WindowEvent::Resized(size) => Some(Self::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::CloseRequested => Some(Self::CloseRequested),
            _ => None,
        }
    }

    /// Translate a device event. Only raw mouse motion is of interest; cursor
    /// positions are meaningless while the cursor is captured.
    pub fn from_device_event(event: &DeviceEvent) -> Option<Self> {
        match event {
            DeviceEvent::MouseMotion { delta: (dx, dy) } => Some(Self::MouseMotion {
                dx: *dx as f32,
                dy: *dy as f32,
            }),
            _ => None,
        }
    }

    fn from_key(key: PhysicalKey, state: ElementState, repeat: bool) -> Option<Self> {
        let PhysicalKey::Code(code) = key else {
            return None;
        };
        match state {
            ElementState::Pressed if repeat => None,
            ElementState::Pressed => Some(Self::KeyDown(code)),
            ElementState::Released => Some(Self::KeyUp(code)),
        }
    }
}
