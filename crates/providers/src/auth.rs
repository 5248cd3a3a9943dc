//! API key resolution (spec §4.3, §6): an explicit key from
//! [`genai_config::ProviderConfig`] always wins; otherwise each adapter
//! falls back to its own environment variable.

use genai_core::Error;
use secrecy::SecretString;

/// Resolves the API key for a provider, returning
/// [`Error::KeyRequired`] rather than failing the whole construction when
/// neither the config nor the environment has one — the client stays
/// inert but inspectable (spec §4.3 "Initialization").
pub fn resolve(provider: &str, configured: &Option<SecretString>, env_var: &str) -> Result<SecretString, Error> {
    if let Some(key) = configured {
        return Ok(key.clone());
    }

    std::env::var(env_var).map(SecretString::from).map_err(|_| Error::KeyRequired {
        provider: provider.to_string(),
        env_var: env_var.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_key_wins_over_environment() {
        // SAFETY: test-local env mutation, no other test reads this var.
        unsafe { std::env::set_var("GENAI_TEST_KEY", "from-env") };
        let configured = Some(SecretString::from("from-config".to_string()));
        let resolved = resolve("test", &configured, "GENAI_TEST_KEY").unwrap();
        assert_eq!(secrecy::ExposeSecret::expose_secret(&resolved), "from-config");
        unsafe { std::env::remove_var("GENAI_TEST_KEY") };
    }

    #[test]
    fn missing_key_and_env_returns_key_required() {
        unsafe { std::env::remove_var("GENAI_TEST_MISSING") };
        let err = resolve("test", &None, "GENAI_TEST_MISSING").unwrap_err();
        assert!(matches!(err, Error::KeyRequired { .. }));
    }
}
