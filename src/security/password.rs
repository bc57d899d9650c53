use crate::config::SecurityConfig;
use crate::error::Error;
use anyhow::Result;
use bcrypt::{hash, verify};
use rand::seq::SliceRandom;
use rand::Rng;

const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+";

/// Hash a password with bcrypt
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let hashed = hash(password, config.password_hash_cost)
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))?;

    Ok(hashed)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let result = verify(password, hash)
        .map_err(|e| Error::Internal(format!("Failed to verify password: {}", e)))?;

    Ok(result)
}

/// Generate a random password containing every character class.
///
/// Lengths below four are raised to four so the result always passes
/// the password strength rules.
pub fn generate_random_password(length: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    let length = length.max(4);

    let mut password: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS]
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();

    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    while password.len() < length {
        password.push(all[rng.gen_range(0..all.len())]);
    }
    password.shuffle(&mut rng);

    password.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let config = SecurityConfig {
            password_hash_cost: 4,
            ..SecurityConfig::default()
        };
        let hashed = hash_password("Correct-Horse-9", &config).unwrap();
        assert!(verify_password("Correct-Horse-9", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }

    #[test]
    fn generated_passwords_are_strong() {
        let password = generate_random_password(16);
        assert_eq!(password.len(), 16);
        assert!(crate::security::validation::validate_password(&password).is_ok());
        assert_ne!(password, generate_random_password(16));
    }
}
