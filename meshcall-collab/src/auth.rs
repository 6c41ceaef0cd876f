use argon2::{
    password_hash::{Encoding, SaltString},
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;

/// Hashes and verifies room passwords.
pub struct Auth {
    argon: Argon2<'static>,
}

/// A hashed room password. The clear text is never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomSecret {
    hash: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The password does not match the room's secret
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("HashError: {0}")]
    HashError(String),
}

impl Auth {
    /// Rooms are short-lived, so a lighter cost than the argon2 default keeps admission fast.
    const MEMORY_COST_KIB: u32 = 4096;
    const TIME_COST: u32 = 2;

    pub fn new() -> Self {
        let params = Params::new(Self::MEMORY_COST_KIB, Self::TIME_COST, 1, None)
            .unwrap_or_default();

        Self {
            argon: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Creates the secret for a new room.
    pub fn hash(&self, password: &str) -> Result<RoomSecret, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        Ok(RoomSecret { hash })
    }

    /// Checks a password against a room's secret.
    pub fn verify(&self, secret: &RoomSecret, password: &str) -> Result<(), AuthError> {
        let stored = PasswordHash::parse(&secret.hash, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(password.as_bytes(), &stored)
            .map_err(|_| AuthError::InvalidCredentials)
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomSecret(..)")
    }
}
