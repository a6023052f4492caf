//! Posting code generation.
//!
//! Codes are six characters from `A-Z0-9`. Candidates come from a random source first and a
//! UUID-derived fallback second, each with a fixed attempt budget. The probe only filters out
//! known collisions; the unique constraint on insert is what actually guarantees uniqueness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::error::PostingError;

pub const CODE_LENGTH: usize = 6;
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const RANDOM_ATTEMPTS: u32 = 20;
pub const FALLBACK_ATTEMPTS: u32 = 20;

pub trait CandidateSource: Send {
    fn next_candidate(&mut self) -> String;
    fn name(&self) -> &str;
}

/// Answers whether a code has already been issued.
pub trait CodeProbe {
    fn code_exists(&self, code: &str) -> Result<bool, PostingError>;
}

/// Uniform draws from the alphabet.
pub struct RandomCandidates {
    rng: StdRng,
}

impl RandomCandidates {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomCandidates {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSource for RandomCandidates {
    fn next_candidate(&mut self) -> String {
        (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[self.rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Base-36 encoding of a fresh v4 UUID, keeping the low six digits.
#[derive(Default)]
pub struct UuidCandidates;

impl CandidateSource for UuidCandidates {
    fn next_candidate(&mut self) -> String {
        encode_base36(Uuid::new_v4().as_u128())
    }

    fn name(&self) -> &str {
        "uuid-fallback"
    }
}

fn encode_base36(mut value: u128) -> String {
    let radix = CODE_ALPHABET.len() as u128;
    let mut out = [0u8; CODE_LENGTH];
    for slot in out.iter_mut().rev() {
        *slot = CODE_ALPHABET[(value % radix) as usize];
        value /= radix;
    }
    out.iter().map(|&b| b as char).collect()
}

pub struct CodeGenerator {
    primary: Box<dyn CandidateSource>,
    fallback: Box<dyn CandidateSource>,
    primary_attempts: u32,
    fallback_attempts: u32,
}

impl CodeGenerator {
    pub fn new(primary: Box<dyn CandidateSource>, fallback: Box<dyn CandidateSource>) -> Self {
        Self {
            primary,
            fallback,
            primary_attempts: RANDOM_ATTEMPTS,
            fallback_attempts: FALLBACK_ATTEMPTS,
        }
    }

    #[cfg(test)]
    pub fn max_attempts(&self) -> u32 {
        self.primary_attempts + self.fallback_attempts
    }

    pub fn ensure_unique_code(&mut self, probe: &dyn CodeProbe) -> Result<String, PostingError> {
        let stages = [
            (&mut self.primary, self.primary_attempts),
            (&mut self.fallback, self.fallback_attempts),
        ];

        let mut attempts = 0;
        for (source, budget) in stages {
            for _ in 0..budget {
                attempts += 1;
                let candidate = source.next_candidate();
                debug_assert!(is_valid_code(&candidate), "bad candidate {candidate}");
                if !probe.code_exists(&candidate)? {
                    return Ok(candidate);
                }
                tracing::debug!(source = source.name(), %candidate, attempts, "posting code already taken");
            }
        }

        tracing::error!(attempts, "posting code space exhausted for this request");
        Err(PostingError::CodeGenerationExhausted { attempts })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(Box::new(RandomCandidates::new()), Box::new(UuidCandidates))
    }
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
