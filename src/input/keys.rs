//! Key names, chords and keybinds

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rdev::Key;

use crate::error::ActuationError;

/// Translate a key name ("3", "f5", "space", "numpad1") into an `rdev` key
pub fn key_from_name(name: &str) -> Result<Key, ActuationError> {
    let normalized = name.trim().to_lowercase();
    let key = match normalized.as_str() {
        // Letters
        "a" => Key::KeyA,
        "b" => Key::KeyB,
        "c" => Key::KeyC,
        "d" => Key::KeyD,
        "e" => Key::KeyE,
        "f" => Key::KeyF,
        "g" => Key::KeyG,
        "h" => Key::KeyH,
        "i" => Key::KeyI,
        "j" => Key::KeyJ,
        "k" => Key::KeyK,
        "l" => Key::KeyL,
        "m" => Key::KeyM,
        "n" => Key::KeyN,
        "o" => Key::KeyO,
        "p" => Key::KeyP,
        "q" => Key::KeyQ,
        "r" => Key::KeyR,
        "s" => Key::KeyS,
        "t" => Key::KeyT,
        "u" => Key::KeyU,
        "v" => Key::KeyV,
        "w" => Key::KeyW,
        "x" => Key::KeyX,
        "y" => Key::KeyY,
        "z" => Key::KeyZ,

        // Top row digits
        "1" => Key::Num1,
        "2" => Key::Num2,
        "3" => Key::Num3,
        "4" => Key::Num4,
        "5" => Key::Num5,
        "6" => Key::Num6,
        "7" => Key::Num7,
        "8" => Key::Num8,
        "9" => Key::Num9,
        "0" => Key::Num0,

        // Function keys
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,

        // Keypad
        "numpad0" | "kp0" => Key::Kp0,
        "numpad1" | "kp1" => Key::Kp1,
        "numpad2" | "kp2" => Key::Kp2,
        "numpad3" | "kp3" => Key::Kp3,
        "numpad4" | "kp4" => Key::Kp4,
        "numpad5" | "kp5" => Key::Kp5,
        "numpad6" | "kp6" => Key::Kp6,
        "numpad7" | "kp7" => Key::Kp7,
        "numpad8" | "kp8" => Key::Kp8,
        "numpad9" | "kp9" => Key::Kp9,

        // Modifiers
        "alt" => Key::Alt,
        "altgr" => Key::AltGr,
        "ctrl" | "control" => Key::ControlLeft,
        "shift" => Key::ShiftLeft,
        "meta" | "cmd" | "win" | "super" => Key::MetaLeft,

        // Special keys
        "space" => Key::Space,
        "enter" | "return" => Key::Return,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "tab" => Key::Tab,
        "insert" => Key::Insert,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,

        // Punctuation
        "minus" | "-" => Key::Minus,
        "equal" | "=" => Key::Equal,
        "leftbracket" | "[" => Key::LeftBracket,
        "rightbracket" | "]" => Key::RightBracket,
        "semicolon" | ";" => Key::SemiColon,
        "quote" | "'" => Key::Quote,
        "backquote" | "`" => Key::BackQuote,
        "backslash" | "\\" => Key::BackSlash,
        "comma" | "," => Key::Comma,
        "dot" | "." => Key::Dot,
        "slash" | "/" => Key::Slash,

        _ => return Err(ActuationError::UnknownKey(name.trim().to_string())),
    };
    Ok(key)
}

fn is_modifier(key: Key) -> bool {
    matches!(
        key,
        Key::Alt
            | Key::AltGr
            | Key::ControlLeft
            | Key::ControlRight
            | Key::ShiftLeft
            | Key::ShiftRight
            | Key::MetaLeft
            | Key::MetaRight
    )
}

/// Zero or more modifiers plus one key, written like `"alt+3"`
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChord {
    modifiers: Vec<Key>,
    key: Key,
    label: String,
}

impl KeyChord {
    pub fn modifiers(&self) -> &[Key] {
        &self.modifiers
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Keys in press order: modifiers first, main key last
    pub fn press_order(&self) -> Vec<Key> {
        let mut keys = self.modifiers.clone();
        keys.push(self.key);
        keys
    }
}

impl FromStr for KeyChord {
    type Err = ActuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(ActuationError::UnknownKey(s.to_string()));
        }

        // A trailing "+" names the plus key itself, which has no portable code
        let parts: Vec<&str> = lowered.split('+').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ActuationError::UnknownKey(s.trim().to_string()));
        }

        let (last, leading) = parts
            .split_last()
            .ok_or_else(|| ActuationError::UnknownKey(s.to_string()))?;

        let mut modifiers = Vec::with_capacity(leading.len());
        let mut names = Vec::with_capacity(parts.len());
        for part in leading {
            let key = key_from_name(part)?;
            if !is_modifier(key) {
                return Err(ActuationError::UnknownKey(format!("{} (not a modifier)", part)));
            }
            if !modifiers.contains(&key) {
                modifiers.push(key);
                names.push(*part);
            }
        }
        let key = key_from_name(last)?;
        names.push(*last);

        Ok(Self {
            modifiers,
            key,
            label: names.join("+"),
        })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Associates a template with the chord pressed when it matches
#[derive(Debug, Clone, PartialEq)]
pub struct Keybind {
    pub template: String,
    pub chord: KeyChord,
    pub hold: Duration,
}

impl Keybind {
    pub fn new(template: impl Into<String>, chord: KeyChord, hold: Duration) -> Self {
        Self {
            template: template.into(),
            chord,
            hold,
        }
    }

    /// Parse the chord from its textual form
    pub fn parse(template: impl Into<String>, chord: &str, hold_ms: u64) -> Result<Self, ActuationError> {
        Ok(Self::new(template, chord.parse()?, Duration::from_millis(hold_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        assert_eq!(key_from_name("1").unwrap(), Key::Num1);
        assert_eq!(key_from_name(" F10 ").unwrap(), Key::F10);
        assert_eq!(key_from_name("Space").unwrap(), Key::Space);
        assert_eq!(key_from_name("numpad5").unwrap(), Key::Kp5);
        assert_eq!(
            key_from_name("hyper").unwrap_err(),
            ActuationError::UnknownKey("hyper".to_string())
        );
    }

    #[test]
    fn test_parse_single_key() {
        let chord: KeyChord = "3".parse().unwrap();
        assert!(chord.modifiers().is_empty());
        assert_eq!(chord.key(), Key::Num3);
        assert_eq!(chord.to_string(), "3");
    }

    #[test]
    fn test_parse_chord() {
        let chord: KeyChord = "Ctrl + Shift+Q".parse().unwrap();
        assert_eq!(chord.modifiers(), &[Key::ControlLeft, Key::ShiftLeft]);
        assert_eq!(chord.key(), Key::KeyQ);
        assert_eq!(chord.press_order(), vec![Key::ControlLeft, Key::ShiftLeft, Key::KeyQ]);
        assert_eq!(chord.to_string(), "ctrl+shift+q");
    }

    #[test]
    fn test_chord_label_is_normalized() {
        let chord: KeyChord = "  ALT +alt+ 3 ".parse().unwrap();
        assert_eq!(chord.modifiers(), &[Key::Alt]);
        assert_eq!(chord.to_string(), "alt+3");
        assert_eq!(chord, "alt+3".parse::<KeyChord>().unwrap());
    }

    #[test]
    fn test_parse_rejects_bad_chords() {
        assert!("".parse::<KeyChord>().is_err());
        assert!("alt+".parse::<KeyChord>().is_err());
        assert!("q+3".parse::<KeyChord>().is_err());
        assert!("alt+nope".parse::<KeyChord>().is_err());
    }

    #[test]
    fn test_keybind_parse() {
        let bind = Keybind::parse("N5", "alt+1", 50).unwrap();
        assert_eq!(bind.template, "N5");
        assert_eq!(bind.chord.modifiers(), &[Key::Alt]);
        assert_eq!(bind.hold, Duration::from_millis(50));
    }
}
