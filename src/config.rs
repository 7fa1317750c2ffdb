use std::env;
use std::num::ParseIntError;

#[derive(Debug, Clone)]
pub struct Config {
    pub signal_port: u16,
    pub rust_log: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidPort(String, ParseIntError),
    PortOutOfRange(u16),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "{} is required", var),
            ConfigError::InvalidPort(val, err) => {
                write!(
                    f,
                    "SIGNAL_PORT must be a valid port number (got '{}': {})",
                    val, err
                )
            }
            ConfigError::PortOutOfRange(port) => {
                write!(f, "SIGNAL_PORT must be between 1 and 65535 (got {})", port)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validates environment variables and returns a Config object
/// Returns an error if any required variable is missing or invalid
pub fn validate_env() -> Result<Config, ConfigError> {
    // Required: SIGNAL_PORT (valid port number)
    let signal_port_str = env::var("SIGNAL_PORT")
        .map_err(|_| ConfigError::MissingVariable("SIGNAL_PORT".to_string()))?;

    let signal_port: u16 = signal_port_str
        .parse()
        .map_err(|e| ConfigError::InvalidPort(signal_port_str.clone(), e))?;

    if signal_port == 0 {
        return Err(ConfigError::PortOutOfRange(signal_port));
    }

    // Optional: RUST_LOG (defaults to "info")
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| {
        tracing::warn!("RUST_LOG not set, using default: info");
        "info".to_string()
    });

    let config = Config {
        signal_port,
        rust_log,
    };

    tracing::info!(
        signal_port = config.signal_port,
        rust_log = config.rust_log,
        "Configuration validated"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    use std::sync::Mutex;

    lazy_static::lazy_static! {
        static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
    }

    // Helper to set up and tear down environment variables for tests
    struct EnvGuard<'a> {
        vars: Vec<String>,
        _guard: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let guard = ENV_MUTEX.lock().unwrap();
            EnvGuard {
                vars: Vec::new(),
                _guard: guard,
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            env::set_var(key, value);
            self.vars.push(key.to_string());
        }

        fn unset(&mut self, key: &str) {
            env::remove_var(key);
            self.vars.push(key.to_string());
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in &self.vars {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_validate_env_valid_configuration() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "8443");
        guard.set("RUST_LOG", "debug");

        let config = validate_env().expect("Expected valid configuration");
        assert_eq!(config.signal_port, 8443);
        assert_eq!(config.rust_log, "debug");
    }

    #[test]
    fn test_validate_env_missing_signal_port() {
        let mut guard = EnvGuard::new();
        guard.unset("SIGNAL_PORT");

        let result = validate_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(_)));
        assert!(err.to_string().contains("SIGNAL_PORT is required"));
    }

    #[test]
    fn test_validate_env_invalid_signal_port() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "not-a-number");

        let result = validate_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_, _)));
        assert!(err
            .to_string()
            .contains("SIGNAL_PORT must be a valid port number"));
    }

    #[test]
    fn test_validate_env_port_out_of_range() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "0");

        let result = validate_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::PortOutOfRange(_)));
        assert!(err.to_string().contains("must be between 1 and 65535"));
    }

    #[test]
    fn test_validate_env_rust_log_defaults() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "8443");
        guard.unset("RUST_LOG");

        let config = validate_env().expect("Expected valid configuration");
        assert_eq!(config.signal_port, 8443);
        assert_eq!(config.rust_log, "info");
    }

    #[test]
    fn test_validate_env_port_edge_cases() {
        let test_cases = vec![("1", 1u16), ("65535", 65535), ("8080", 8080)];

        for (port_str, expected_port) in test_cases {
            let mut guard = EnvGuard::new();
            guard.set("SIGNAL_PORT", port_str);

            let config = validate_env()
                .unwrap_or_else(|e| panic!("Expected port {} to be valid: {}", port_str, e));
            assert_eq!(config.signal_port, expected_port);
        }
    }
}
