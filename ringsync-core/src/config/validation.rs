use crate::config::schema::Config;
use crate::error::{Error, Result};

pub fn validate_config(config: &Config) -> Result<()> {
    if config.ring.group.trim().is_empty() {
        return Err(Error::Validation(
            "ring.group must name the service group".to_owned(),
        ));
    }

    if config.ring.parameters_service.trim().is_empty() {
        return Err(Error::Validation(
            "ring.parameters_service cannot be empty".to_owned(),
        ));
    }

    if config.schemas.dir.trim().is_empty() {
        return Err(Error::Validation("schemas.dir cannot be empty".to_owned()));
    }

    if config.registry.prefix.trim().is_empty() {
        return Err(Error::Validation(
            "registry.prefix cannot be empty".to_owned(),
        ));
    }

    if config.lock.idle_timeout_ms == 0 {
        return Err(Error::Validation(
            "lock.idle_timeout_ms must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_config;
    use crate::config::schema::Config;

    #[test]
    fn accepts_defaults() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_empty_group() {
        let mut config = Config::default();
        config.ring.group = " ".to_owned();

        let error = validate_config(&config).expect_err("validation should fail");
        assert!(error.to_string().contains("ring.group"));
    }

    #[test]
    fn rejects_zero_lock_timeout() {
        let mut config = Config::default();
        config.lock.idle_timeout_ms = 0;

        let error = validate_config(&config).expect_err("validation should fail");
        assert!(error.to_string().contains("idle_timeout_ms"));
    }
}
