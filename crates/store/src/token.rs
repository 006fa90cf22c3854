//! Token secret generation, indexed lookup prefixes, and Argon2id hashing.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const TOKEN_PREFIX: &str = "lpk_";
const SECRET_RAND_LEN: usize = 40;
pub const LOOKUP_PREFIX_LEN: usize = 12;

const ARGON2_M_COST: u32 = 19 * 1024;
const ARGON2_T_COST: u32 = 2;
const ARGON2_P_COST: u32 = 1;

fn argon2() -> Argon2<'static> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, None)
        .expect("valid argon2 params");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Generate a new bearer secret of the form `lpk_<40 alphanumeric chars>`.
pub fn generate_secret() -> String {
    let rand: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_RAND_LEN)
        .map(char::from)
        .collect();
    format!("{TOKEN_PREFIX}{rand}")
}

/// The indexed, non-secret prefix used to narrow a lookup to one row before
/// paying for an Argon2id verification.
pub fn lookup_prefix(secret: &str) -> String {
    secret.chars().take(LOOKUP_PREFIX_LEN).collect()
}

pub fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash error: {e}"))?
        .to_string();
    Ok(hash)
}

pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2().verify_password(secret.as_bytes(), &parsed).is_ok()
}
