use std::env;

pub const DEFAULT_API_HOSTNAME: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Models offered to the user when no other list is configured.
pub const DEFAULT_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4", "gpt-4-turbo-preview"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Temperature {0} is outside of [0.0, 2.0]")]
    TemperatureOutOfRange(f64),
    #[error("Model {model} is not one of: {}", .allowed.join(", "))]
    UnknownModel { model: String, allowed: Vec<String> },
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Sampling settings sent along with every request.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
}

impl ModelConfig {
    /// Build a config, checking the model against `allowed` and the
    /// temperature against the supported range.
    pub fn new(model: &str, temperature: f64, allowed: &[String]) -> Result<Self, ConfigError> {
        validate_temperature(temperature)?;
        if !allowed.iter().any(|m| m == model) {
            return Err(ConfigError::UnknownModel {
                model: model.to_string(),
                allowed: allowed.to_vec(),
            });
        }
        Ok(Self {
            model: model.to_string(),
            temperature,
        })
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

fn validate_temperature(temperature: f64) -> Result<(), ConfigError> {
    if (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        Ok(())
    } else {
        Err(ConfigError::TemperatureOutOfRange(temperature))
    }
}

/// The user adjustable knobs for a chat: model, temperature and the
/// API key. The key falls back to whatever came from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    model_config: ModelConfig,
    allowed_models: Vec<String>,
    credential: Option<String>,
    default_credential: Option<String>,
}

impl Settings {
    pub fn new(
        model_config: ModelConfig,
        allowed_models: Vec<String>,
        default_credential: Option<String>,
    ) -> Self {
        Self {
            model_config,
            allowed_models,
            credential: None,
            default_credential,
        }
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn allowed_models(&self) -> &[String] {
        &self.allowed_models
    }

    pub fn set_model(&mut self, model: &str) -> Result<(), ConfigError> {
        self.model_config = ModelConfig::new(
            model,
            self.model_config.temperature,
            &self.allowed_models,
        )?;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<(), ConfigError> {
        validate_temperature(temperature)?;
        self.model_config.temperature = temperature;
        Ok(())
    }

    /// Empty input keeps whatever key was set before.
    pub fn set_credential(&mut self, credential: &str) {
        if !credential.is_empty() {
            self.credential = Some(credential.to_string());
        }
    }

    /// The key to send with requests, if any. An explicitly set key
    /// wins over the environment default and empty strings count as
    /// missing.
    pub fn effective_credential(&self) -> Option<&str> {
        self.credential
            .as_deref()
            .or(self.default_credential.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_hostname: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub temperature: f64,
    pub allowed_models: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let openai_api_hostname =
            env::var("CHATBOT_LLM_HOST").unwrap_or_else(|_| DEFAULT_API_HOSTNAME.to_string());
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let openai_model = env::var("CHATBOT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let temperature = match env::var("CHATBOT_TEMPERATURE") {
            Ok(value) => value
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: "CHATBOT_TEMPERATURE",
                    value: value.clone(),
                })?,
            Err(_) => DEFAULT_TEMPERATURE,
        };
        validate_temperature(temperature)?;

        Ok(Self {
            openai_api_hostname,
            openai_api_key,
            openai_model,
            temperature,
            allowed_models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        })
    }

    /// Settings for a new chat, with optional overrides from the caller.
    pub fn settings(
        &self,
        model: Option<&str>,
        temperature: Option<f64>,
    ) -> Result<Settings, ConfigError> {
        let model_config = ModelConfig::new(
            model.unwrap_or(&self.openai_model),
            temperature.unwrap_or(self.temperature),
            &self.allowed_models,
        )?;
        Ok(Settings::new(
            model_config,
            self.allowed_models.clone(),
            self.openai_api_key.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn allowed() -> Vec<String> {
        DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_model_config_bounds() {
        assert!(ModelConfig::new("gpt-4", 0.0, &allowed()).is_ok());
        assert!(ModelConfig::new("gpt-4", 2.0, &allowed()).is_ok());
        assert_eq!(
            ModelConfig::new("gpt-4", 2.1, &allowed()),
            Err(ConfigError::TemperatureOutOfRange(2.1))
        );
        assert!(ModelConfig::new("gpt-4", -0.1, &allowed()).is_err());
        assert!(ModelConfig::new("gpt-4", f64::NAN, &allowed()).is_err());
    }

    #[test]
    fn test_model_config_unknown_model() {
        let err = ModelConfig::new("llama", 0.7, &allowed()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel { .. }));
        assert!(err.to_string().contains("gpt-3.5-turbo"));
    }

    #[test]
    fn test_settings_credential_fallback() {
        let mut settings = Settings::new(
            ModelConfig::default(),
            allowed(),
            Some("env-key".to_string()),
        );
        assert_eq!(settings.effective_credential(), Some("env-key"));

        settings.set_credential("");
        assert_eq!(settings.effective_credential(), Some("env-key"));

        settings.set_credential("user-key");
        assert_eq!(settings.effective_credential(), Some("user-key"));

        settings.set_credential("");
        assert_eq!(settings.effective_credential(), Some("user-key"));
    }

    #[test]
    fn test_settings_without_any_credential() {
        let settings = Settings::new(ModelConfig::default(), allowed(), Some(String::new()));
        assert_eq!(settings.effective_credential(), None);
    }

    #[test]
    fn test_settings_rejects_bad_updates() {
        let mut settings = Settings::new(ModelConfig::default(), allowed(), None);
        assert!(settings.set_model("nope").is_err());
        assert!(settings.set_temperature(3.0).is_err());
        assert_eq!(settings.model_config(), &ModelConfig::default());

        settings.set_model("gpt-4").unwrap();
        settings.set_temperature(1.2).unwrap();
        assert_eq!(settings.model_config().model, "gpt-4");
        assert_eq!(settings.model_config().temperature, 1.2);
    }

    #[test]
    #[serial]
    fn test_app_config_from_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("CHATBOT_MODEL", "gpt-4");
            env::set_var("CHATBOT_TEMPERATURE", "1.5");
            env::remove_var("CHATBOT_LLM_HOST");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.openai_api_hostname, DEFAULT_API_HOSTNAME);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_model, "gpt-4");
        assert_eq!(config.temperature, 1.5);

        let settings = config.settings(None, Some(0.2)).unwrap();
        assert_eq!(settings.model_config().model, "gpt-4");
        assert_eq!(settings.model_config().temperature, 0.2);
        assert_eq!(settings.effective_credential(), Some("sk-test"));

        unsafe {
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("CHATBOT_MODEL");
            env::remove_var("CHATBOT_TEMPERATURE");
        }
    }

    #[test]
    #[serial]
    fn test_app_config_bad_temperature() {
        unsafe {
            env::set_var("CHATBOT_TEMPERATURE", "warm");
        }
        assert!(matches!(
            AppConfig::from_env(),
            Err(ConfigError::InvalidEnv { .. })
        ));
        unsafe {
            env::remove_var("CHATBOT_TEMPERATURE");
        }
    }
}
