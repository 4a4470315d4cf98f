//! Pickup passcodes.
//!
//! A passcode is scoped to one occupancy of one locker: it is minted when an
//! empty locker receives its first package, shared by every ticket issued
//! while the locker stays occupied, and discarded when the locker is cleared.
//! Uniqueness across time is therefore not required, only unpredictability.

use subtle::ConstantTimeEq;

use crate::env::Environment;

/// Default passcode length in characters.
pub const DEFAULT_PASSCODE_LENGTH: usize = 8;

/// Shortest code [`RandomPasscodes`] will generate. Shorter requested lengths
/// are raised to this.
pub const MIN_PASSCODE_LENGTH: usize = 4;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every character is equally likely.
const REJECTION_BOUND: u8 = 248;

/// Locker passcode.
///
/// # Security
///
/// - **Debug Redaction**: The `Debug` impl never prints the code.
/// - **Comparison**: [`Passcode::matches`] runs in constant time with respect
///   to the stored code.
#[derive(Clone, PartialEq, Eq)]
pub struct Passcode(String);

impl Passcode {
    /// Wrap an existing code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as presented to the customer.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the code is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check a candidate supplied at the locker.
    ///
    /// An empty code never matches, not even the empty candidate.
    pub fn matches(&self, candidate: &str) -> bool {
        !self.0.is_empty() && bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl std::fmt::Debug for Passcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passcode(<redacted {} chars>)", self.0.len())
    }
}

/// Produces passcodes for newly occupied lockers.
pub trait PasscodeGenerator: Send + Sync {
    /// Mint a fresh passcode.
    fn generate(&self) -> Passcode;
}

/// Alphanumeric passcodes drawn from the environment's entropy source.
///
/// Codes are only as unpredictable as the entropy behind them. An
/// environment that hands back constant bytes (for example a zero-filled
/// buffer after an OS entropy failure) produces the same code for every
/// locker.
#[derive(Debug, Clone)]
pub struct RandomPasscodes<E: Environment> {
    env: E,
    length: usize,
}

impl<E: Environment> RandomPasscodes<E> {
    /// Generator producing codes of `length` characters, at least
    /// [`MIN_PASSCODE_LENGTH`].
    pub fn new(env: E, length: usize) -> Self {
        if length < MIN_PASSCODE_LENGTH {
            tracing::warn!(length, min = MIN_PASSCODE_LENGTH, "passcode length raised to minimum");
        }
        Self { env, length: length.max(MIN_PASSCODE_LENGTH) }
    }
}

impl<E: Environment> PasscodeGenerator for RandomPasscodes<E> {
    fn generate(&self) -> Passcode {
        let mut code = String::with_capacity(self.length);
        let mut buffer = vec![0u8; self.length * 2];

        while code.len() < self.length {
            self.env.random_bytes(&mut buffer);
            for &byte in buffer.iter().filter(|&&b| b < REJECTION_BOUND) {
                if code.len() == self.length {
                    break;
                }
                code.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
            }
        }

        Passcode(code)
    }
}
