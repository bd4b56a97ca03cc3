//! Application configuration.

use rtrt_render::RenderPath;

/// Enables the `VK_LAYER_LUNARG_api_dump` layer when set to `1`.
pub const API_DUMP_ENV: &str = "RTRT_API_DUMP";
/// Forces the rasterize path when set to anything but empty or `0`.
pub const FORCE_RASTER_ENV: &str = "RTRT_FORCE_RASTER";

/// Application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Enable the API dump layer. Consulted at GPU initialization only.
    pub api_dump: bool,
    /// Path of the first frame.
    pub initial_path: RenderPath,
    /// Keep the renderer on the rasterize path even on ray tracing devices.
    pub force_raster: bool,
    /// Record the HUD overlay.
    pub overlay: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "rtrt".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: false,
            validation: cfg!(debug_assertions),
            api_dump: false,
            initial_path: RenderPath::Raytrace,
            force_raster: false,
            overlay: true,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_api_dump(mut self, api_dump: bool) -> Self {
        self.api_dump = api_dump;
        self
    }

    pub fn with_initial_path(mut self, path: RenderPath) -> Self {
        self.initial_path = path;
        self
    }

    /// Pin the renderer to the rasterize path.
    pub fn with_force_raster(mut self, force: bool) -> Self {
        self.force_raster = force;
        self
    }

    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    /// Apply `RTRT_API_DUMP` and `RTRT_FORCE_RASTER` from the process
    /// environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply the environment overrides through `lookup`.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup(API_DUMP_ENV).is_some_and(|v| v.trim() == "1") {
            self.api_dump = true;
        }
        if lookup(FORCE_RASTER_ENV).is_some_and(|v| !matches!(v.trim(), "" | "0")) {
            self.force_raster = true;
        }
        self
    }

    /// Path the renderer starts on, after the raster override.
    pub fn effective_initial_path(&self) -> RenderPath {
        if self.force_raster {
            RenderPath::Rasterize
        } else {
            self.initial_path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new("test")
            .with_size(800, 600)
            .with_vsync(true)
            .with_overlay(false)
            .with_initial_path(RenderPath::Rasterize);
        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.vsync);
        assert!(!config.overlay);
        assert_eq!(config.initial_path, RenderPath::Rasterize);
    }

    #[test]
    fn api_dump_needs_exactly_one() {
        let config = AppConfig::default().with_overrides_from(env(&[(API_DUMP_ENV, "1")]));
        assert!(config.api_dump);
        let config = AppConfig::default().with_overrides_from(env(&[(API_DUMP_ENV, "yes")]));
        assert!(!config.api_dump);
    }

    #[test]
    fn force_raster_overrides_initial_path() {
        let config = AppConfig::default().with_overrides_from(env(&[(FORCE_RASTER_ENV, "1")]));
        assert!(config.force_raster);
        assert_eq!(config.effective_initial_path(), RenderPath::Rasterize);

        let config = AppConfig::default().with_overrides_from(env(&[(FORCE_RASTER_ENV, "0")]));
        assert!(!config.force_raster);
        assert_eq!(config.effective_initial_path(), RenderPath::Raytrace);
    }

    #[test]
    fn missing_variables_change_nothing() {
        let config = AppConfig::default().with_overrides_from(env(&[]));
        assert!(!config.api_dump);
        assert!(!config.force_raster);
    }
}
