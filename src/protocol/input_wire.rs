//! Client→host input token encoding
//!
//! Comma-separated ASCII tokens, one message per event:
//!
//! - `m,<x>,<y>,<mask>,<wheel>`   absolute pointer sample
//! - `m2,<dx>,<dy>,<mask>,<wheel>` relative (pointer-locked) sample
//! - `kd,<keysym>` / `ku,<keysym>` key down/up
//! - `kr`                          reset all keyboard state
//! - `p,1` / `p,0`                 pointer lock engaged/released
//! - `vb,<kbps>` / `ab,<kbps>`     requested video/audio bitrate
//! - `r,<W>x<H>`                   requested remote frame resolution
//! - `s,<scale>`                   device pixel ratio
//! - `_arg_fps,<fps>`              requested framerate
//! - `cr`                          client ready for clipboard pushes
//! - `cw,<base64>`                 client pushing clipboard content
//! - `js,…`                        gamepad connect/disconnect/button/axis
//! - `pong,<epochSeconds>`         reply to a host ping

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// One encodable unit of the input wire protocol
#[derive(Debug, Clone, PartialEq)]
pub enum InputToken {
    PointerAbsolute { x: i32, y: i32, mask: u32, wheel: i32 },
    PointerRelative { dx: i32, dy: i32, mask: u32, wheel: i32 },
    KeyDown(u32),
    KeyUp(u32),
    KeyboardReset,
    PointerLock(bool),
    VideoBitrate(u32),
    AudioBitrate(u32),
    Resolution { width: u32, height: u32 },
    PixelRatio(f64),
    Framerate(u32),
    ClipboardReady,
    ClipboardWrite(String),
    GamepadConnect { pad: usize, buttons: usize, axes: usize },
    GamepadDisconnect { pad: usize },
    GamepadButton { pad: usize, button: usize, value: f64 },
    GamepadAxis { pad: usize, axis: usize, value: f64 },
    Pong { epoch_seconds: f64 },
}

impl InputToken {
    /// Encode to the wire form
    pub fn encode(&self) -> String {
        match self {
            InputToken::PointerAbsolute { x, y, mask, wheel } => {
                format!("m,{x},{y},{mask},{wheel}")
            }
            InputToken::PointerRelative { dx, dy, mask, wheel } => {
                format!("m2,{dx},{dy},{mask},{wheel}")
            }
            InputToken::KeyDown(keysym) => format!("kd,{keysym}"),
            InputToken::KeyUp(keysym) => format!("ku,{keysym}"),
            InputToken::KeyboardReset => "kr".to_string(),
            InputToken::PointerLock(engaged) => {
                format!("p,{}", if *engaged { 1 } else { 0 })
            }
            InputToken::VideoBitrate(kbps) => format!("vb,{kbps}"),
            InputToken::AudioBitrate(kbps) => format!("ab,{kbps}"),
            InputToken::Resolution { width, height } => format!("r,{width}x{height}"),
            InputToken::PixelRatio(scale) => format!("s,{scale}"),
            InputToken::Framerate(fps) => format!("_arg_fps,{fps}"),
            InputToken::ClipboardReady => "cr".to_string(),
            InputToken::ClipboardWrite(text) => format!("cw,{}", BASE64.encode(text)),
            InputToken::GamepadConnect { pad, buttons, axes } => {
                format!("js,c,{pad},{buttons},{axes}")
            }
            InputToken::GamepadDisconnect { pad } => format!("js,d,{pad}"),
            InputToken::GamepadButton { pad, button, value } => {
                format!("js,b,{pad},{button},{value}")
            }
            InputToken::GamepadAxis { pad, axis, value } => {
                format!("js,a,{pad},{axis},{value}")
            }
            InputToken::Pong { epoch_seconds } => format!("pong,{epoch_seconds}"),
        }
    }
}

impl std::fmt::Display for InputToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_tokens() {
        let abs = InputToken::PointerAbsolute {
            x: 100,
            y: 200,
            mask: 1,
            wheel: 0,
        };
        assert_eq!(abs.encode(), "m,100,200,1,0");

        let rel = InputToken::PointerRelative {
            dx: -3,
            dy: 7,
            mask: 0,
            wheel: 0,
        };
        assert_eq!(rel.encode(), "m2,-3,7,0,0");
    }

    #[test]
    fn test_key_tokens() {
        assert_eq!(InputToken::KeyDown(0xff0d).encode(), "kd,65293");
        assert_eq!(InputToken::KeyUp(0xff0d).encode(), "ku,65293");
        assert_eq!(InputToken::KeyboardReset.encode(), "kr");
    }

    #[test]
    fn test_pointer_lock_tokens() {
        assert_eq!(InputToken::PointerLock(true).encode(), "p,1");
        assert_eq!(InputToken::PointerLock(false).encode(), "p,0");
    }

    #[test]
    fn test_quality_tokens() {
        assert_eq!(InputToken::VideoBitrate(8000).encode(), "vb,8000");
        assert_eq!(InputToken::AudioBitrate(128).encode(), "ab,128");
        assert_eq!(
            InputToken::Resolution {
                width: 1920,
                height: 1080
            }
            .encode(),
            "r,1920x1080"
        );
        assert_eq!(InputToken::PixelRatio(2.0).encode(), "s,2");
        assert_eq!(InputToken::Framerate(60).encode(), "_arg_fps,60");
    }

    #[test]
    fn test_clipboard_tokens() {
        assert_eq!(InputToken::ClipboardReady.encode(), "cr");

        let token = InputToken::ClipboardWrite("hello".to_string());
        let encoded = token.encode();
        assert!(encoded.starts_with("cw,"));
        let payload = BASE64.decode(&encoded[3..]).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_gamepad_tokens() {
        assert_eq!(
            InputToken::GamepadConnect {
                pad: 0,
                buttons: 17,
                axes: 4
            }
            .encode(),
            "js,c,0,17,4"
        );
        assert_eq!(InputToken::GamepadDisconnect { pad: 0 }.encode(), "js,d,0");
        assert_eq!(
            InputToken::GamepadButton {
                pad: 0,
                button: 3,
                value: 1.0
            }
            .encode(),
            "js,b,0,3,1"
        );
        assert_eq!(
            InputToken::GamepadAxis {
                pad: 1,
                axis: 2,
                value: -0.5
            }
            .encode(),
            "js,a,1,2,-0.5"
        );
    }

    #[test]
    fn test_pong_token() {
        let token = InputToken::Pong {
            epoch_seconds: 1700000000.5,
        };
        assert_eq!(token.encode(), "pong,1700000000.5");
    }
}
