//! Password verification against legacy bcrypt hashes.

use tracing::warn;

use super::AuthError;

/// bcrypt cost factor used when hashing.
const BCRYPT_COST: u32 = 10;

/// Hash a password with bcrypt (cost 10).
///
/// The core never writes legacy accounts; this exists for seeding and tests.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a stored legacy hash.
///
/// A hash that is not in bcrypt (`$2…`) form never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if !hash.starts_with("$2") {
        warn!("legacy password hash is not in bcrypt format");
        return false;
    }
    match bcrypt::verify(password, hash) {
        Ok(valid) => valid,
        Err(e) => {
            warn!(error = %e, "bcrypt verify failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_verifies() {
        let hash = bcrypt::hash("oldpass", 4).unwrap();
        assert!(verify_password("oldpass", &hash));
        assert!(!verify_password("newpass", &hash));
    }

    #[test]
    fn non_bcrypt_hash_never_matches() {
        assert!(!verify_password("oldpass", "plain-oldpass"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn corrupt_bcrypt_hash_never_matches() {
        assert!(!verify_password("oldpass", "$2b$10$tooshort"));
    }
}
