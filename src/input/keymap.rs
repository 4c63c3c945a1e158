//! Keyboard symbol translation
//!
//! Platform/layout differences are isolated behind the [`KeyMapper`] trait:
//! the encoder hands it raw platform key codes and forwards whatever keysym
//! comes back. The default implementation maps USB HID usage codes
//! (Keyboard/Keypad page 0x07) to X11 keysyms, which is what a streaming
//! host expects on the wire.

/// X11 keysym values the encoder itself needs for hotkey detection
pub mod keysym {
    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const META_L: u32 = 0xffeb;
    pub const META_R: u32 = 0xffec;
    pub const CAPS_LOCK: u32 = 0xffe5;

    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const DELETE: u32 = 0xffff;
    pub const INSERT: u32 = 0xff63;
    pub const HOME: u32 = 0xff50;
    pub const END: u32 = 0xff57;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;

    pub const F1: u32 = 0xffbe;
    pub const F5: u32 = 0xffc2;
    pub const F11: u32 = 0xffc8;

    pub const LOWER_F: u32 = 0x66;
    pub const LOWER_I: u32 = 0x69;
    pub const LOWER_M: u32 = 0x6d;
}

/// Translates platform key codes into wire keysyms.
///
/// Injected into the encoder so tests (and non-default platforms) can
/// substitute their own layout logic.
pub trait KeyMapper: Send + Sync {
    /// Translate a platform key code; `None` drops the event.
    fn keysym(&self, code: u32) -> Option<u32>;
}

/// Default mapper: USB HID usage codes → X11 keysyms
#[derive(Debug, Default)]
pub struct UsbHidKeyMapper;

impl KeyMapper for UsbHidKeyMapper {
    fn keysym(&self, code: u32) -> Option<u32> {
        use keysym::*;

        Some(match code {
            // Letters A-Z (0x04-0x1D) -> lowercase latin keysyms
            0x04..=0x1d => 0x61 + (code - 0x04),
            // Digits 1-9 (0x1E-0x26), 0 (0x27)
            0x1e..=0x26 => 0x31 + (code - 0x1e),
            0x27 => 0x30,

            0x28 => RETURN,
            0x29 => ESCAPE,
            0x2a => BACKSPACE,
            0x2b => TAB,
            0x2c => 0x20, // space
            0x2d => 0x2d, // minus
            0x2e => 0x3d, // equal
            0x2f => 0x5b, // left bracket
            0x30 => 0x5d, // right bracket
            0x31 => 0x5c, // backslash
            0x33 => 0x3b, // semicolon
            0x34 => 0x27, // apostrophe
            0x35 => 0x60, // grave
            0x36 => 0x2c, // comma
            0x37 => 0x2e, // period
            0x38 => 0x2f, // slash
            0x39 => CAPS_LOCK,

            // Function keys F1-F12 (0x3A-0x45)
            0x3a..=0x45 => F1 + (code - 0x3a),

            0x49 => INSERT,
            0x4a => HOME,
            0x4b => PAGE_UP,
            0x4c => DELETE,
            0x4d => END,
            0x4e => PAGE_DOWN,
            0x4f => RIGHT,
            0x50 => LEFT,
            0x51 => DOWN,
            0x52 => UP,

            // Modifiers (0xE0-0xE7)
            0xe0 => CONTROL_L,
            0xe1 => SHIFT_L,
            0xe2 => ALT_L,
            0xe3 => META_L,
            0xe4 => CONTROL_R,
            0xe5 => SHIFT_R,
            0xe6 => ALT_R,
            0xe7 => META_R,

            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters() {
        let mapper = UsbHidKeyMapper;
        assert_eq!(mapper.keysym(0x04), Some(0x61)); // a
        assert_eq!(mapper.keysym(0x1d), Some(0x7a)); // z
        assert_eq!(mapper.keysym(0x10), Some(keysym::LOWER_M));
    }

    #[test]
    fn test_digits() {
        let mapper = UsbHidKeyMapper;
        assert_eq!(mapper.keysym(0x1e), Some(0x31)); // 1
        assert_eq!(mapper.keysym(0x26), Some(0x39)); // 9
        assert_eq!(mapper.keysym(0x27), Some(0x30)); // 0
    }

    #[test]
    fn test_function_keys() {
        let mapper = UsbHidKeyMapper;
        assert_eq!(mapper.keysym(0x3a), Some(keysym::F1));
        assert_eq!(mapper.keysym(0x3e), Some(keysym::F5));
        assert_eq!(mapper.keysym(0x44), Some(keysym::F11));
    }

    #[test]
    fn test_modifiers() {
        let mapper = UsbHidKeyMapper;
        assert_eq!(mapper.keysym(0xe0), Some(keysym::CONTROL_L));
        assert_eq!(mapper.keysym(0xe5), Some(keysym::SHIFT_R));
        assert_eq!(mapper.keysym(0xe7), Some(keysym::META_R));
    }

    #[test]
    fn test_unknown_code_dropped() {
        let mapper = UsbHidKeyMapper;
        assert_eq!(mapper.keysym(0xffff), None);
    }
}
