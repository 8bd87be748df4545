use serde::{Deserialize, Serialize};

/// Emission tuning. The cadence and count fields stay host-side; the
/// rest is mirrored into a device uniform block, with the cone angle
/// converted to its cosine on upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    /// Frames between emission batches; 0 disables emission.
    pub emit_interval: u32,
    /// Frames between compactions; 0 disables compaction.
    pub compact_interval: u32,
    pub count_min: u32,
    pub count_max: u32,
    pub position: [f32; 3],
    pub position_radius: f32,
    pub velocity: [f32; 3],
    /// Cone half-angle in degrees: 0 pins the direction, 180 means any.
    pub velocity_angle: f32,
    pub life_min: f32,
    pub life_max: f32,
    pub mass_min: f32,
    pub mass_max: f32,
    pub size_min: f32,
    pub size_max: f32,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        EmitterSettings {
            emit_interval: 1,
            compact_interval: 1,
            count_min: 1,
            count_max: 1,
            position: [0.0; 3],
            position_radius: 0.0,
            velocity: [0.0, 1.0, 0.0],
            velocity_angle: 180.0,
            life_min: 1.0,
            life_max: 1.0,
            mass_min: 1.0,
            mass_max: 1.0,
            size_min: 0.05,
            size_max: 0.05,
        }
    }
}

impl EmitterSettings {
    pub fn velocity_angle_cos(&self) -> f32 {
        self.velocity_angle.to_radians().cos()
    }
}

/// Read fresh by the integrate stage every update; cheap enough that
/// dirty tracking would buy nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub force: [f32; 3],
    pub gravity: f32,
    pub drag: f32,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        UpdateSettings {
            force: [0.0; 3],
            gravity: 9.8,
            drag: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings { color: [1.0; 4] }
    }
}

// Startup configuration. These seed the live settings; the window size
// and frame cap don't change at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub fps: f64,
    pub emitter: EmitterSettings,
    pub update: UpdateSettings,
    pub render: RenderSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            window_width: 1280,
            window_height: 720,
            fps: 60.0,
            emitter: EmitterSettings::default(),
            update: UpdateSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = toml::de::Error;
    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        toml::from_str(serialized)
    }
}

/// Loads the config from disk, falling back to the embedded default
/// file, and to coded defaults if neither parses.
pub fn load(path: &str) -> AppConfig {
    let (text, origin) = match std::fs::read_to_string(path) {
        Ok(text) => (std::borrow::Cow::Owned(text), path),
        Err(_) => (
            std::borrow::Cow::Borrowed(include_str!("../config.toml")),
            "embedded config.toml",
        ),
    };
    match text.parse() {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to parse config ({}): {:?}", origin, e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let config = AppConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = serialized.parse().unwrap();
        assert_eq!(config.window_width, deserialized.window_width);
        assert_eq!(config.emitter.count_max, deserialized.emitter.count_max);
        assert_eq!(config.update.gravity, deserialized.update.gravity);
        assert_eq!(config.render.color, deserialized.render.color);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig = "window_width = 640\n[emitter]\ncount_max = 32\n"
            .parse()
            .unwrap();
        assert_eq!(config.window_width, 640);
        assert_eq!(config.emitter.count_max, 32);
        assert_eq!(config.window_height, AppConfig::default().window_height);
        assert_eq!(config.emitter.velocity_angle, 180.0);
    }

    #[test]
    fn angle_cosine_covers_cone_extremes() {
        let mut settings = EmitterSettings::default();
        settings.velocity_angle = 180.0;
        assert!((settings.velocity_angle_cos() + 1.0).abs() < 1e-6);
        settings.velocity_angle = 0.0;
        assert!((settings.velocity_angle_cos() - 1.0).abs() < 1e-6);
        settings.velocity_angle = 90.0;
        assert!(settings.velocity_angle_cos().abs() < 1e-6);
    }

    #[test]
    fn embedded_default_config_parses() {
        let config: AppConfig = include_str!("../config.toml").parse().unwrap();
        assert!(config.emitter.count_max >= config.emitter.count_min);
        assert!(config.emitter.life_max >= config.emitter.life_min);
    }
}
