use argon2::{
    Argon2,
    PasswordHasher,
};

use argon2::password_hash::{SaltString, rand_core::OsRng};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash a new password using Argon2id with a random salt.
/// Store the returned PHC string in users.password.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| format!("argon2 hash error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{PasswordHash, PasswordVerifier};

    #[test]
    fn hash_verifies_and_is_salted() {
        let a = hash_password("admin123").unwrap();
        let b = hash_password("admin123").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));

        let parsed = PasswordHash::new(&a).unwrap();
        assert!(Argon2::default().verify_password(b"admin123", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"admin124", &parsed).is_err());
    }
}
