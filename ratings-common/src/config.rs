use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2")]
    pub retry_backoff_coefficient: u32,

    #[envconfig(default = "1000")]
    pub retry_initial_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub retry_maximum_interval: EnvMsDuration,

    #[envconfig(default = "5")]
    pub retry_max_attempts: u32,
}

/// A duration given in milliseconds in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A duration given in seconds in the environment, rejecting zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSecsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecsDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvSecsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u64>() {
            Ok(0) | Err(_) => Err(ParseEnvSecsDurationError),
            Ok(secs) => Ok(EnvSecsDuration(time::Duration::from_secs(secs))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(
            "250".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(time::Duration::from_millis(250)))
        );
        assert!("soon".parse::<EnvMsDuration>().is_err());

        assert_eq!(
            "30".parse::<EnvSecsDuration>(),
            Ok(EnvSecsDuration(time::Duration::from_secs(30)))
        );
        assert!("0".parse::<EnvSecsDuration>().is_err());
    }

    #[test]
    fn rejects_blank_strings() {
        assert!("  ".parse::<NonEmptyString>().is_err());
        assert_eq!(
            "movies_ratings".parse::<NonEmptyString>().unwrap().as_str(),
            "movies_ratings"
        );
    }
}
