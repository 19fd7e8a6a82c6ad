//! Password hashing and verification utilities.

/// Hash a password with bcrypt at the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Verify a password against a stored bcrypt hash. A malformed hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
