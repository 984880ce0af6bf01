use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

/// Hash a room password with argon2 for storage. The result is a PHC string.
pub fn hash_room_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check a supplied room password against a stored hash.
pub fn verify_room_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify() {
        let hash = hash_room_password("pw1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_room_password("pw1", &hash));
        assert!(!verify_room_password("wrong", &hash));
    }

    #[test]
    fn test_same_password_different_salts() {
        let a = hash_room_password("pw1").unwrap();
        let b = hash_room_password("pw1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_room_password("pw1", "not-a-phc-string"));
        assert!(!verify_room_password("", ""));
    }
}
