use rand::Rng;
use thiserror::Error;

/// Alphanumerics with the visually confusable characters (`0 O o 1 l I`)
/// removed. 56 symbols.
pub const DEFAULT_ALPHABET: &str = "23456789abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

pub const DEFAULT_LENGTH: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("code alphabet must not be empty")]
    EmptyAlphabet,
    #[error("code alphabet contains '{0}' more than once")]
    DuplicateSymbol(char),
    #[error("code length must be at least 1")]
    ZeroLength,
}

/// Source of candidate short codes. Implementations never touch storage;
/// uniqueness is decided by the store when the candidate is inserted.
pub trait Generator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Uniform random codes of a fixed length over a fixed alphabet.
///
/// # Sizing
///
/// With an alphabet of `A` symbols and length `L` the code space holds
/// `N = A^L` codes. Once `n` codes are issued a fresh candidate collides with
/// probability `p = n / N`, so a creation needs more than `k` attempts with
/// probability `p^k`. Separately, the chance that any two of `n` independent
/// draws coincide is roughly `1 - exp(-n² / 2N)` (the birthday bound), which is
/// why collisions show up long before the space is anywhere near full.
///
/// Keep `n / N` small: at the defaults (56 symbols, length 7, `N ≈ 1.7e12`) a
/// corpus of ten million links still collides on under one attempt in 100k.
/// When `n / N` climbs past a few percent, raise the length.
#[derive(Debug, Clone)]
pub struct RandomCodes {
    alphabet: Vec<char>,
    length: usize,
}

impl RandomCodes {
    pub fn new(alphabet: &str, length: usize) -> Result<Self, ConfigError> {
        let symbols: Vec<char> = alphabet.chars().collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        if length == 0 {
            return Err(ConfigError::ZeroLength);
        }
        for (i, c) in symbols.iter().enumerate() {
            if symbols[..i].contains(c) {
                return Err(ConfigError::DuplicateSymbol(*c));
            }
        }

        Ok(Self {
            alphabet: symbols,
            length,
        })
    }

    pub fn alphabet_len(&self) -> usize {
        self.alphabet.len()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of distinct codes, `A^L`, as a float since it overflows `u64`
    /// quickly.
    pub fn space(&self) -> f64 {
        (self.alphabet.len() as f64).powi(self.length as i32)
    }

    /// Probability that one candidate hits one of `corpus` issued codes.
    pub fn collision_probability(&self, corpus: u64) -> f64 {
        (corpus as f64 / self.space()).min(1.0)
    }

    /// Probability that `attempts` consecutive candidates all collide.
    pub fn exhaustion_probability(&self, corpus: u64, attempts: u32) -> f64 {
        self.collision_probability(corpus).powi(attempts as i32)
    }
}

impl Default for RandomCodes {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.chars().collect(),
            length: DEFAULT_LENGTH,
        }
    }
}

impl Generator for RandomCodes {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }
}
