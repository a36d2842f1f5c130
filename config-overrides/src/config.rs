use std::ops::Deref;
use std::str::FromStr;

use envconfig::Envconfig;

use crate::store::DEFAULT_KEY_SUFFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(from = "STORAGE_KEY_SUFFIX", default = "-overrides")]
    pub storage_key_suffix: String,

    #[envconfig(from = "STORAGE_TIMEOUT_MS", default = "100")]
    pub storage_timeout_ms: u64,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            redis_url: "redis://localhost:6379/".to_string(),
            storage_key_suffix: DEFAULT_KEY_SUFFIX.to_string(),
            storage_timeout_ms: 100,
            debug: FlexBool(false),
        }
    }
}
