use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub cors_allowed_origin: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_timeout_secs: u64,
    pub seed_default_data: bool,
    pub admin_email: String,
    pub admin_password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // DATABASE_URL wins; otherwise assemble one from the DB_* pieces.
        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => {
                let host = get("DB_HOST").unwrap_or_else(|| "localhost".to_string());
                let port = get("DB_PORT").unwrap_or_else(|| "3306".to_string());
                let user = get("DB_USER").unwrap_or_else(|| "root".to_string());
                let name = get("DB_NAME").unwrap_or_else(|| "healthcare_crm".to_string());
                match get("DB_PASSWORD") {
                    Some(pw) => format!("mysql://{user}:{pw}@{host}:{port}/{name}"),
                    None => format!("mysql://{user}@{host}:{port}/{name}"),
                }
            }
        };

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5001".to_string());

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(s) => s
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive integer"))?,
            None => 10,
        };

        let openai_timeout_secs = match get("OPENAI_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("OPENAI_TIMEOUT_SECS must be a positive integer"))?,
            None => 60,
        };

        let seed_default_data = get("SEED_DEFAULT_DATA")
            .map(|s| !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            cors_allowed_origin: get("CORS_ALLOWED_ORIGIN"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
            openai_timeout_secs,
            seed_default_data,
            admin_email: get("ADMIN_EMAIL").unwrap_or_else(|| "admin@hospital.com".to_string()),
            admin_password: get("ADMIN_PASSWORD").unwrap_or_else(|| "admin123".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.database_url, "mysql://root@localhost:3306/healthcare_crm");
        assert_eq!(cfg.bind_addr, "127.0.0.1:5001");
        assert_eq!(cfg.db_max_connections, 10);
        assert_eq!(cfg.openai_model, "gpt-4");
        assert_eq!(cfg.openai_timeout_secs, 60);
        assert!(cfg.openai_api_key.is_none());
        assert!(cfg.cors_allowed_origin.is_none());
        assert!(cfg.seed_default_data);
    }

    #[test]
    fn database_url_takes_precedence_over_parts() {
        let cfg = config_from(&[
            ("DATABASE_URL", "mysql://app:secret@db:3307/hospital"),
            ("DB_HOST", "ignored"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url, "mysql://app:secret@db:3307/hospital");
    }

    #[test]
    fn url_is_assembled_from_parts_with_password() {
        let cfg = config_from(&[
            ("DB_HOST", "mysql.internal"),
            ("DB_USER", "clinic"),
            ("DB_PASSWORD", "pw"),
            ("DB_NAME", "crm"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url, "mysql://clinic:pw@mysql.internal:3306/crm");
    }

    #[test]
    fn rejects_zero_pool_size() {
        assert!(config_from(&[("DB_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config_from(&[("DB_MAX_CONNECTIONS", "ten")]).is_err());
    }

    #[test]
    fn llm_timeout_must_be_positive() {
        assert!(config_from(&[("OPENAI_TIMEOUT_SECS", "0")]).is_err());
        let cfg = config_from(&[("OPENAI_TIMEOUT_SECS", "15")]).unwrap();
        assert_eq!(cfg.openai_timeout_secs, 15);
    }

    #[test]
    fn seed_flag_can_be_disabled() {
        let cfg = config_from(&[("SEED_DEFAULT_DATA", "false")]).unwrap();
        assert!(!cfg.seed_default_data);
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let cfg = config_from(&[("OPENAI_API_KEY", "   ")]).unwrap();
        assert!(cfg.openai_api_key.is_none());
    }
}
