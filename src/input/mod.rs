//! Input capture and encoding
//!
//! Translates device events injected by the embedding layer into wire
//! tokens on the data channel. The encoder is deliberately dumb about
//! transport: it writes encoded tokens into an unbounded channel drained by
//! the session's writer task, and silently drops them while the data
//! channel is closed. High-rate input must never fail loudly.

pub mod gamepad;
pub mod keymap;
pub mod mapping;
pub mod wheel;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::events::{EventBus, SessionEvent};
use crate::protocol::InputToken;
use gamepad::{GamepadChange, GamepadPoller, GamepadSource, GAMEPAD_POLL_INTERVAL};
use keymap::{keysym, KeyMapper, UsbHidKeyMapper};
use mapping::CoordinateMapping;
use wheel::{WheelFilter, WheelStep, TRACKPAD_FLUSH_INTERVAL};

/// Frame widths within this many pixels of the scaled window are treated
/// as matching, and relative deltas pass through unscaled.
const CURSOR_SCALE_TOLERANCE: f64 = 10.0;

/// Device event injected by the embedding layer
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Absolute pointer position in client window space
    PointerMove { x: f64, y: f64 },
    /// Relative pointer motion, only meaningful under pointer lock
    PointerDelta { dx: f64, dy: f64 },
    ButtonDown { button: u8 },
    ButtonUp { button: u8 },
    /// Vertical wheel delta, negative = scroll up
    Wheel { delta_y: f64 },
    /// Platform key code (translated by the configured [`KeyMapper`])
    KeyDown { code: u32 },
    KeyUp { code: u32 },
    /// Pointer lock engaged or released
    PointerLock { engaged: bool },
    /// Window lost input focus
    FocusLost,
    /// Client window resized
    WindowResized { width: u32, height: u32 },
}

struct EncoderState {
    mapping: CoordinateMapping,
    window: (u32, u32),
    frame: (u32, u32),
    pixel_ratio: f64,
    mask: u32,
    pressed: HashSet<u32>,
    pointer_lock: bool,
    last_host_pos: (i32, i32),
    wheel: WheelFilter,
    tasks: Vec<JoinHandle<()>>,
    attached: bool,
}

impl EncoderState {
    fn new() -> Self {
        Self {
            mapping: CoordinateMapping::compute(1920, 1080, 1920, 1080),
            window: (1920, 1080),
            frame: (1920, 1080),
            pixel_ratio: 1.0,
            mask: 0,
            pressed: HashSet::new(),
            pointer_lock: false,
            last_host_pos: (0, 0),
            wheel: WheelFilter::new(),
            tasks: Vec::new(),
            attached: false,
        }
    }

    fn recompute_mapping(&mut self) {
        self.mapping = CoordinateMapping::compute(
            self.window.0,
            self.window.1,
            self.frame.0,
            self.frame.1,
        );
    }

    /// Relative-motion scale under pointer lock. When the host frame is
    /// (close to) the scaled window size, deltas pass through untouched;
    /// otherwise they are stretched to cover the larger surface.
    fn cursor_scale(&self) -> f64 {
        let scaled_w = self.window.0 as f64 * self.pixel_ratio;
        if (self.frame.0 as f64 - scaled_w).abs() <= CURSOR_SCALE_TOLERANCE {
            1.0
        } else {
            self.frame.0 as f64 / scaled_w.max(1.0)
        }
    }

    fn modifier_held(&self, left: u32, right: u32) -> bool {
        self.pressed.contains(&left) || self.pressed.contains(&right)
    }
}

/// Encodes injected device events into data-channel tokens.
///
/// Lifecycle follows the data channel: `attach` when it opens, `detach`
/// when it closes. Both are idempotent so racing open/close notifications
/// cannot double-start the timers or double-send the keyboard reset.
pub struct InputEncoder {
    outbound: mpsc::UnboundedSender<String>,
    channel_open: Arc<AtomicBool>,
    events: EventBus,
    mapper: Arc<dyn KeyMapper>,
    gamepads: Option<Arc<dyn GamepadSource>>,
    state: Mutex<EncoderState>,
}

impl InputEncoder {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        channel_open: Arc<AtomicBool>,
        events: EventBus,
    ) -> Self {
        Self {
            outbound,
            channel_open,
            events,
            mapper: Arc::new(UsbHidKeyMapper),
            gamepads: None,
            state: Mutex::new(EncoderState::new()),
        }
    }

    pub fn with_key_mapper(mut self, mapper: Arc<dyn KeyMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_gamepad_source(mut self, source: Arc<dyn GamepadSource>) -> Self {
        self.gamepads = Some(source);
        self
    }

    /// Start encoding: announces the client surface to the host and starts
    /// the wheel-flush and gamepad timers. No-op when already attached.
    pub fn attach(self: &Arc<Self>) {
        let (window, pixel_ratio) = {
            let mut state = self.state.lock();
            if state.attached {
                return;
            }
            state.attached = true;
            (state.window, state.pixel_ratio)
        };

        let (w, h) = scaled_resolution(window, pixel_ratio);
        self.send(InputToken::Resolution {
            width: w,
            height: h,
        });
        self.send(InputToken::PixelRatio(pixel_ratio));

        let flusher = {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(TRACKPAD_FLUSH_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let step = this.state.lock().wheel.flush(Instant::now());
                    if let Some(step) = step {
                        this.send_wheel_step(step);
                    }
                }
            })
        };

        let mut tasks = vec![flusher];
        if let Some(source) = self.gamepads.clone() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut poller = GamepadPoller::new();
                let mut ticker = tokio::time::interval(GAMEPAD_POLL_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    for change in poller.poll(source.as_ref()) {
                        this.forward_gamepad_change(change);
                    }
                }
            }));
        }

        self.state.lock().tasks.append(&mut tasks);
    }

    /// Stop encoding: aborts timers, clears held state and tells the host
    /// to release all keys. No-op when already detached.
    pub fn detach(&self) {
        {
            let mut state = self.state.lock();
            if !state.attached {
                return;
            }
            state.attached = false;
            for task in state.tasks.drain(..) {
                task.abort();
            }
            state.mask = 0;
            state.pressed.clear();
            state.pointer_lock = false;
            state.wheel.reset();
        }
        self.send(InputToken::KeyboardReset);
    }

    /// Host frame resolution changed (from a pipeline control message)
    pub fn set_frame_size(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.frame = (width, height);
        state.recompute_mapping();
    }

    /// Display scale of the client surface changed
    pub fn set_device_pixel_ratio(&self, ratio: f64) {
        let attached = {
            let mut state = self.state.lock();
            state.pixel_ratio = ratio;
            state.attached
        };
        if attached {
            self.send(InputToken::PixelRatio(ratio));
        }
    }

    /// Feed one device event through the encoder
    pub fn handle_event(&self, event: DeviceEvent) {
        if !self.state.lock().attached {
            return;
        }

        match event {
            DeviceEvent::PointerMove { x, y } => self.on_pointer_move(x, y),
            DeviceEvent::PointerDelta { dx, dy } => self.on_pointer_delta(dx, dy),
            DeviceEvent::ButtonDown { button } => self.on_button(button, true),
            DeviceEvent::ButtonUp { button } => self.on_button(button, false),
            DeviceEvent::Wheel { delta_y } => {
                let step = self.state.lock().wheel.on_wheel(delta_y, Instant::now());
                if let Some(step) = step {
                    self.send_wheel_step(step);
                }
            }
            DeviceEvent::KeyDown { code } => self.on_key_down(code),
            DeviceEvent::KeyUp { code } => self.on_key_up(code),
            DeviceEvent::PointerLock { engaged } => {
                let mut state = self.state.lock();
                state.pointer_lock = engaged;
                state.wheel.reset();
                drop(state);
                self.send(InputToken::PointerLock(engaged));
            }
            DeviceEvent::FocusLost => {
                let mut state = self.state.lock();
                state.mask = 0;
                state.pressed.clear();
                state.wheel.reset();
                drop(state);
                self.send(InputToken::KeyboardReset);
            }
            DeviceEvent::WindowResized { width, height } => {
                let (window, ratio) = {
                    let mut state = self.state.lock();
                    state.window = (width, height);
                    state.recompute_mapping();
                    (state.window, state.pixel_ratio)
                };
                let (w, h) = scaled_resolution(window, ratio);
                self.send(InputToken::Resolution {
                    width: w,
                    height: h,
                });
            }
        }
    }

    fn on_pointer_move(&self, x: f64, y: f64) {
        let (hx, hy, mask) = {
            let mut state = self.state.lock();
            if state.pointer_lock {
                return;
            }
            let (hx, hy) = state.mapping.client_to_host(x, y);
            state.last_host_pos = (hx, hy);
            (hx, hy, state.mask)
        };
        self.send(InputToken::PointerAbsolute {
            x: hx,
            y: hy,
            mask,
            wheel: 0,
        });
    }

    fn on_pointer_delta(&self, dx: f64, dy: f64) {
        let (scale, mask) = {
            let state = self.state.lock();
            if !state.pointer_lock {
                return;
            }
            (state.cursor_scale(), state.mask)
        };
        self.send(InputToken::PointerRelative {
            dx: (dx * scale).round() as i32,
            dy: (dy * scale).round() as i32,
            mask,
            wheel: 0,
        });
    }

    fn on_button(&self, button: u8, down: bool) {
        let bit = 1u32 << button.min(31);
        let (pos, mask, locked) = {
            let mut state = self.state.lock();
            if down {
                state.mask |= bit;
            } else {
                state.mask &= !bit;
            }
            (state.last_host_pos, state.mask, state.pointer_lock)
        };
        self.send_pointer_sample(pos, mask, locked);
    }

    fn on_key_down(&self, code: u32) {
        let Some(sym) = self.mapper.keysym(code) else {
            return;
        };

        let mut state = self.state.lock();
        let ctrl = state.modifier_held(keysym::CONTROL_L, keysym::CONTROL_R);
        let shift = state.modifier_held(keysym::SHIFT_L, keysym::SHIFT_R);

        // Client-side hotkeys never reach the host
        if ctrl && shift && sym == keysym::LOWER_M {
            drop(state);
            self.events.publish(SessionEvent::MenuHotkey);
            return;
        }
        if ctrl && shift && sym == keysym::LOWER_F {
            drop(state);
            self.events.publish(SessionEvent::FullscreenHotkey);
            return;
        }
        // Combos that would act on the client itself are swallowed
        if (ctrl && shift && sym == keysym::LOWER_I)
            || (ctrl && sym == keysym::F5)
            || sym == keysym::F11
        {
            return;
        }

        state.pressed.insert(sym);
        drop(state);
        self.send(InputToken::KeyDown(sym));
    }

    fn on_key_up(&self, code: u32) {
        let Some(sym) = self.mapper.keysym(code) else {
            return;
        };
        // Releases for swallowed downs are swallowed too
        if self.state.lock().pressed.remove(&sym) {
            self.send(InputToken::KeyUp(sym));
        }
    }

    /// Wheel steps are synthesized as press+release of the scroll button
    fn send_wheel_step(&self, step: WheelStep) {
        let (pos, mask, locked) = {
            let state = self.state.lock();
            (state.last_host_pos, state.mask, state.pointer_lock)
        };
        let bit = 1u32 << step.button();
        for _ in 0..step.magnitude {
            self.send_pointer_sample(pos, mask | bit, locked);
            self.send_pointer_sample(pos, mask, locked);
        }
    }

    fn send_pointer_sample(&self, pos: (i32, i32), mask: u32, locked: bool) {
        if locked {
            self.send(InputToken::PointerRelative {
                dx: 0,
                dy: 0,
                mask,
                wheel: 0,
            });
        } else {
            self.send(InputToken::PointerAbsolute {
                x: pos.0,
                y: pos.1,
                mask,
                wheel: 0,
            });
        }
    }

    fn forward_gamepad_change(&self, change: GamepadChange) {
        match change {
            GamepadChange::Connected { pad, buttons, axes } => {
                self.events.publish(SessionEvent::GamepadConnected(pad));
                self.send(InputToken::GamepadConnect { pad, buttons, axes });
            }
            GamepadChange::Disconnected { pad } => {
                self.events.publish(SessionEvent::GamepadDisconnected(pad));
                self.send(InputToken::GamepadDisconnect { pad });
            }
            GamepadChange::Button { pad, button, value } => {
                self.send(InputToken::GamepadButton { pad, button, value });
            }
            GamepadChange::Axis { pad, axis, value } => {
                self.send(InputToken::GamepadAxis { pad, axis, value });
            }
        }
    }

    fn send(&self, token: InputToken) {
        if !self.channel_open.load(Ordering::Acquire) {
            trace!(%token, "data channel closed, dropping input token");
            return;
        }
        // Receiver dropped means the session is tearing down; nothing to do
        let _ = self.outbound.send(token.encode());
    }
}

fn scaled_resolution(window: (u32, u32), pixel_ratio: f64) -> (u32, u32) {
    // Even dimensions keep the host encoder happy
    let w = ((window.0 as f64 * pixel_ratio).round() as u32) & !1;
    let h = ((window.1 as f64 * pixel_ratio).round() as u32) & !1;
    (w.max(2), h.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn encoder() -> (Arc<InputEncoder>, UnboundedReceiver<String>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let enc = Arc::new(InputEncoder::new(tx, Arc::clone(&open), EventBus::new()));
        (enc, rx, open)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_attach_announces_surface() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();

        let sent = drain(&mut rx);
        assert_eq!(sent, vec!["r,1920x1080".to_string(), "s,1".to_string()]);
    }

    #[tokio::test]
    async fn test_attach_idempotent() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);
        enc.attach();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_absolute_pointer_motion() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::PointerMove { x: 960.0, y: 540.0 });
        enc.handle_event(DeviceEvent::ButtonDown { button: 0 });
        enc.handle_event(DeviceEvent::ButtonUp { button: 0 });

        let sent = drain(&mut rx);
        assert_eq!(sent[0], "m,960,540,0,0");
        assert_eq!(sent[1], "m,960,540,1,0");
        assert_eq!(sent[2], "m,960,540,0,0");
    }

    #[tokio::test]
    async fn test_pointer_lock_switches_to_relative() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::PointerLock { engaged: true });
        enc.handle_event(DeviceEvent::PointerDelta { dx: 5.0, dy: -3.0 });
        // Absolute samples are ignored while locked
        enc.handle_event(DeviceEvent::PointerMove { x: 10.0, y: 10.0 });

        let sent = drain(&mut rx);
        assert_eq!(sent, vec!["p,1".to_string(), "m2,5,-3,0,0".to_string()]);
    }

    #[tokio::test]
    async fn test_relative_motion_scaled_to_frame() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        enc.set_frame_size(3840, 2160);
        drain(&mut rx);

        enc.handle_event(DeviceEvent::PointerLock { engaged: true });
        enc.handle_event(DeviceEvent::PointerDelta { dx: 5.0, dy: 5.0 });

        let sent = drain(&mut rx);
        assert_eq!(sent[1], "m2,10,10,0,0");
    }

    #[tokio::test]
    async fn test_key_events_translated() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::KeyDown { code: 0x04 }); // a
        enc.handle_event(DeviceEvent::KeyUp { code: 0x04 });
        // Unmapped code dropped entirely
        enc.handle_event(DeviceEvent::KeyDown { code: 0xffff });

        let sent = drain(&mut rx);
        assert_eq!(sent, vec!["kd,97".to_string(), "ku,97".to_string()]);
    }

    #[tokio::test]
    async fn test_menu_hotkey_intercepted() {
        let (enc, mut rx, _open) = encoder();
        let mut events = enc.events.subscribe();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::KeyDown { code: 0xe0 }); // ctrl
        enc.handle_event(DeviceEvent::KeyDown { code: 0xe1 }); // shift
        enc.handle_event(DeviceEvent::KeyDown { code: 0x10 }); // m
        enc.handle_event(DeviceEvent::KeyUp { code: 0x10 });

        let sent = drain(&mut rx);
        // Modifiers forwarded, the hotkey letter never is
        assert_eq!(
            sent,
            vec!["kd,65507".to_string(), "kd,65505".to_string()]
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::MenuHotkey
        ));
    }

    #[tokio::test]
    async fn test_refresh_and_devtools_swallowed() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::KeyDown { code: 0xe0 }); // ctrl
        enc.handle_event(DeviceEvent::KeyDown { code: 0x3e }); // F5
        enc.handle_event(DeviceEvent::KeyUp { code: 0x3e });
        enc.handle_event(DeviceEvent::KeyUp { code: 0xe0 });
        enc.handle_event(DeviceEvent::KeyDown { code: 0x44 }); // F11
        enc.handle_event(DeviceEvent::KeyUp { code: 0x44 });

        let sent = drain(&mut rx);
        assert_eq!(sent, vec!["kd,65507".to_string(), "ku,65507".to_string()]);
    }

    #[tokio::test]
    async fn test_focus_lost_resets_keyboard() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::KeyDown { code: 0xe0 });
        enc.handle_event(DeviceEvent::ButtonDown { button: 0 });
        enc.handle_event(DeviceEvent::FocusLost);

        let sent = drain(&mut rx);
        assert_eq!(sent.last().unwrap(), "kr");

        // Held state was cleared: the next sample carries an empty mask
        enc.handle_event(DeviceEvent::PointerMove { x: 0.0, y: 0.0 });
        assert_eq!(drain(&mut rx), vec!["m,0,0,0,0".to_string()]);
    }

    #[tokio::test]
    async fn test_wheel_press_release_synthesis() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::Wheel { delta_y: -120.0 });
        let sent = drain(&mut rx);
        // Scroll up: button 4 press then release
        assert_eq!(
            sent,
            vec!["m,0,0,16,0".to_string(), "m,0,0,0,0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_detach_sends_reset_once() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.detach();
        enc.detach();
        assert_eq!(drain(&mut rx), vec!["kr".to_string()]);

        // Events are ignored while detached
        enc.handle_event(DeviceEvent::PointerMove { x: 1.0, y: 1.0 });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_drops_silently() {
        let (enc, mut rx, open) = encoder();
        enc.attach();
        drain(&mut rx);

        open.store(false, Ordering::Release);
        enc.handle_event(DeviceEvent::PointerMove { x: 5.0, y: 5.0 });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_resize_reannounces_resolution() {
        let (enc, mut rx, _open) = encoder();
        enc.attach();
        drain(&mut rx);

        enc.handle_event(DeviceEvent::WindowResized {
            width: 1280,
            height: 721,
        });
        // Odd dimensions are rounded down to even
        assert_eq!(drain(&mut rx), vec!["r,1280x720".to_string()]);
    }
}
