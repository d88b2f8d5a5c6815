use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Number of letters in the alphabet rotated by [`ShiftCipher`]
pub const ALPHABET_LEN: u8 = 26;

/// Character transformation applied by the transform stage
///
/// Implementations must be pure with respect to the character stream: the
/// only state allowed to change between calls is a key that is swapped while
/// the pipeline is paused for a reset.
pub trait Transform: Send + Sync + 'static {
    fn apply(&self, byte: u8) -> u8;

    /// Get a human-readable name for this transform
    fn name(&self) -> &str {
        "transform"
    }
}

/// Leaves every character unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, byte: u8) -> u8 {
        byte
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Wraps a plain function or closure
pub struct FnTransform<F>
where
    F: Fn(u8) -> u8 + Send + Sync + 'static,
{
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(u8) -> u8 + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnTransform<F>
where
    F: Fn(u8) -> u8 + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform").field("name", &self.name).finish()
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(u8) -> u8 + Send + Sync + 'static,
{
    fn apply(&self, byte: u8) -> u8 {
        (self.f)(byte)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Rotates ASCII letters by a key, preserving case; other bytes pass through
///
/// The key can be replaced at runtime. Only change it while the pipeline is
/// paused (inside a reset) so that every character of a reset window is
/// encrypted with the same key.
#[derive(Debug)]
pub struct ShiftCipher {
    key: AtomicU8,
}

impl ShiftCipher {
    /// Create a cipher; the key is reduced modulo 26
    pub fn new(key: u8) -> Self {
        Self {
            key: AtomicU8::new(key % ALPHABET_LEN),
        }
    }

    pub fn key(&self) -> u8 {
        self.key.load(Ordering::Acquire)
    }

    pub fn set_key(&self, key: u8) {
        self.key.store(key % ALPHABET_LEN, Ordering::Release);
    }

    /// Advance the key by `step` and return the new key
    pub fn rotate(&self, step: u8) -> u8 {
        let next = ((self.key() as u16 + step as u16) % ALPHABET_LEN as u16) as u8;
        self.set_key(next);
        next
    }
}

impl Default for ShiftCipher {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Transform for ShiftCipher {
    fn apply(&self, byte: u8) -> u8 {
        let key = self.key();
        match byte {
            b'a'..=b'z' => b'a' + (byte - b'a' + key) % ALPHABET_LEN,
            b'A'..=b'Z' => b'A' + (byte - b'A' + key) % ALPHABET_LEN,
            _ => byte,
        }
    }

    fn name(&self) -> &str {
        "shift-cipher"
    }
}
