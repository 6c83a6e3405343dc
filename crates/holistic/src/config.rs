//! Application configuration from environment variables.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{error::ConfigError, runtime::Delegate};

pub const ENV_VAR_WEBCAM_NAME: &str = "HOLISTIC_WEBCAM_NAME";
pub const ENV_VAR_MODEL_DIR: &str = "HOLISTIC_MODEL_DIR";
pub const ENV_VAR_MODEL_URL: &str = "HOLISTIC_MODEL_URL";
pub const ENV_VAR_DELEGATE: &str = "HOLISTIC_DELEGATE";
pub const ENV_VAR_DISPLAY_WIDTH: &str = "HOLISTIC_DISPLAY_WIDTH";
pub const ENV_VAR_FPS: &str = "HOLISTIC_FPS";
pub const ENV_VAR_DRAW_VIDEO: &str = "HOLISTIC_DRAW_VIDEO";

/// Runtime configuration of the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Name of the capture device to open. `None` selects the first compatible device.
    pub webcam_name: Option<String>,
    /// Directory holding the model bundles. Downloaded bundles are cached here.
    pub model_dir: PathBuf,
    /// Base URL that model bundles are downloaded from when missing locally.
    pub model_url: Option<String>,
    /// Preferred inference delegate.
    pub delegate: Delegate,
    /// Width of the displayed overlay. The height follows the video's aspect ratio.
    pub display_width: u32,
    /// Rate at which the frame loop is scheduled.
    pub fps: u32,
    /// Whether the camera image is drawn underneath the landmarks.
    pub draw_video: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webcam_name: None,
            model_dir: PathBuf::from("models"),
            model_url: None,
            delegate: Delegate::Gpu,
            display_width: 480,
            fps: 60,
            draw_video: false,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// Unset variables keep their default value. Set but invalid values result in an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(name) = lookup(ENV_VAR_WEBCAM_NAME) {
            config.webcam_name = Some(name);
        }
        if let Some(dir) = lookup(ENV_VAR_MODEL_DIR) {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_VAR_MODEL_URL) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError {
                    var: ENV_VAR_MODEL_URL,
                    value: url,
                    reason: "must be an http:// or https:// URL".into(),
                });
            }
            config.model_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(value) = lookup(ENV_VAR_DELEGATE) {
            config.delegate = value.parse().map_err(|reason| ConfigError {
                var: ENV_VAR_DELEGATE,
                value,
                reason,
            })?;
        }
        if let Some(value) = lookup(ENV_VAR_DISPLAY_WIDTH) {
            config.display_width = parse_nonzero(ENV_VAR_DISPLAY_WIDTH, value)?;
        }
        if let Some(value) = lookup(ENV_VAR_FPS) {
            config.fps = parse_nonzero(ENV_VAR_FPS, value)?;
        }
        if let Some(value) = lookup(ENV_VAR_DRAW_VIDEO) {
            config.draw_video = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError {
                        var: ENV_VAR_DRAW_VIDEO,
                        value,
                        reason: "expected a boolean".into(),
                    })
                }
            };
        }

        Ok(config)
    }

    /// Returns the interval between two frame loop ticks.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }
}

fn parse_nonzero<T: FromStr + Default + PartialEq>(
    var: &'static str,
    value: String,
) -> Result<T, ConfigError> {
    match value.trim().parse::<T>() {
        Ok(v) if v != T::default() => Ok(v),
        Ok(_) => Err(ConfigError {
            var,
            value,
            reason: "must not be zero".into(),
        }),
        Err(_) => Err(ConfigError {
            var,
            value,
            reason: "expected a positive integer".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.display_width, 480);
        assert_eq!(config.delegate, Delegate::Gpu);
    }

    #[test]
    fn parses_values() {
        let config = config_from(&[
            (ENV_VAR_WEBCAM_NAME, "HD Pro Webcam C920"),
            (ENV_VAR_MODEL_DIR, "/var/cache/holistic"),
            (ENV_VAR_MODEL_URL, "https://models.example.org/v1/"),
            (ENV_VAR_DELEGATE, "CPU"),
            (ENV_VAR_DISPLAY_WIDTH, "640"),
            (ENV_VAR_FPS, "30"),
            (ENV_VAR_DRAW_VIDEO, "yes"),
        ])
        .unwrap();

        assert_eq!(config.webcam_name.as_deref(), Some("HD Pro Webcam C920"));
        assert_eq!(config.model_dir, PathBuf::from("/var/cache/holistic"));
        assert_eq!(
            config.model_url.as_deref(),
            Some("https://models.example.org/v1")
        );
        assert_eq!(config.delegate, Delegate::Cpu);
        assert_eq!(config.display_width, 640);
        assert_eq!(config.fps, 30);
        assert!(config.draw_video);
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn empty_values_are_ignored() {
        let config = config_from(&[(ENV_VAR_WEBCAM_NAME, ""), (ENV_VAR_FPS, "  ")]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from(&[(ENV_VAR_FPS, "0")]).unwrap_err();
        assert_eq!(err.var, ENV_VAR_FPS);

        let err = config_from(&[(ENV_VAR_DISPLAY_WIDTH, "wide")]).unwrap_err();
        assert_eq!(err.var, ENV_VAR_DISPLAY_WIDTH);

        let err = config_from(&[(ENV_VAR_DELEGATE, "tpu")]).unwrap_err();
        assert_eq!(err.var, ENV_VAR_DELEGATE);

        let err = config_from(&[(ENV_VAR_MODEL_URL, "ftp://example.org")]).unwrap_err();
        assert_eq!(err.var, ENV_VAR_MODEL_URL);

        assert!(config_from(&[(ENV_VAR_DRAW_VIDEO, "maybe")]).is_err());
    }
}
