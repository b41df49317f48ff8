//! Settings persistence using dconf
//!
//! Settings are stored in dconf under `/com/wavrec/recorder/`

use log::error;

use crate::models::{DEFAULT_PLAYBACK_SPEED, PLAYBACK_SPEEDS};

const DCONF_PATH: &str = "/com/wavrec/recorder/";

/// Keys for dconf settings
mod keys {
    pub const PLAYBACK_SPEED: &str = "playback-speed";
}

/// Where user preferences outlive a session
pub trait SettingsStore {
    /// Last chosen playback speed, or the default
    fn playback_speed(&self) -> f32;

    fn set_playback_speed(&mut self, speed: f32);
}

/// Whether `speed` is one of the offered playback speeds
pub fn is_supported_speed(speed: f32) -> bool {
    PLAYBACK_SPEEDS.contains(&speed)
}

/// Parse a stored speed, rejecting anything outside the offered set
pub fn parse_speed(value: &str) -> Option<f32> {
    let speed: f32 = value.trim().trim_matches(|c| c == '\'' || c == '"').parse().ok()?;
    is_supported_speed(speed).then_some(speed)
}

/// Settings backed by the user's dconf database
#[derive(Debug, Default)]
pub struct DconfSettings;

impl SettingsStore for DconfSettings {
    fn playback_speed(&self) -> f32 {
        let key = format!("{}{}", DCONF_PATH, keys::PLAYBACK_SPEED);
        dconf_rs::get_string(&key)
            .ok()
            .and_then(|value| parse_speed(&value))
            .unwrap_or(DEFAULT_PLAYBACK_SPEED)
    }

    fn set_playback_speed(&mut self, speed: f32) {
        let key = format!("{}{}", DCONF_PATH, keys::PLAYBACK_SPEED);
        if let Err(e) = dconf_rs::set_string(&key, &speed.to_string()) {
            error!("Failed to save playback speed to dconf: {}", e);
        }
    }
}

/// Settings that live only as long as the process
#[derive(Debug, Default)]
pub struct MemorySettings {
    speed: Option<f32>,
}

impl SettingsStore for MemorySettings {
    fn playback_speed(&self) -> f32 {
        self.speed.unwrap_or(DEFAULT_PLAYBACK_SPEED)
    }

    fn set_playback_speed(&mut self, speed: f32) {
        self.speed = Some(speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("1.5"), Some(1.5));
        assert_eq!(parse_speed("'0.25'"), Some(0.25));
        assert_eq!(parse_speed(" 2 "), Some(2.0));
        assert_eq!(parse_speed("3.0"), None);
        assert_eq!(parse_speed("fast"), None);
    }

    #[test]
    fn test_memory_settings_round_trip() {
        let mut settings = MemorySettings::default();
        assert_eq!(settings.playback_speed(), DEFAULT_PLAYBACK_SPEED);
        settings.set_playback_speed(0.75);
        assert_eq!(settings.playback_speed(), 0.75);
    }
}
