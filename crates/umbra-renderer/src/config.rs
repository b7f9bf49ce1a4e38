//! Renderer configuration.
//!
//! Plain value passed once to [`crate::Renderer::new`]; nothing reads it
//! through globals.

use std::path::PathBuf;

use crate::error::{RenderError, Result};

/// Directory the build script writes compiled SPIR-V into.
pub const BUILD_SPIRV_DIR: &str = env!("UMBRA_SPIRV_DIR");

/// Far plane used by point-light cube shadow maps.
pub const SHADOW_FAR_PLANE: f32 = 100.0;

/// Default capacity of each per-frame timestamp pool.
pub const DEFAULT_TIMING_QUERIES: u32 = 32;

/// Passes bracketed by timestamps every frame.
pub const TIMED_PASS_COUNT: u32 = 4;

/// Default size of the per-frame light and light-matrix buffers.
pub const DEFAULT_MAX_LIGHTS: u32 = 64;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Enable VK_LAYER_KHRONOS_validation and the debug messenger.
    pub validation: bool,
    /// FIFO presentation when true, mailbox/immediate otherwise.
    pub vsync: bool,
    /// Edge length of every shadow map, in texels.
    pub shadow_resolution: u32,
    pub shadow_far_plane: f32,
    /// Where `<name>.spv` shader binaries are loaded from.
    pub shader_dir: PathBuf,
    /// Where `<effect>.ini` parameter defaults are loaded from.
    pub effect_config_dir: PathBuf,
    /// Post-processing chain, in execution order.
    pub effects: Vec<String>,
    pub timing_queries: u32,
    /// Lights a scene may carry; sizes the per-frame light buffers.
    pub max_lights: u32,
    pub enable_directional_lights: bool,
    pub enable_point_lights: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            shadow_resolution: 2048,
            shadow_far_plane: SHADOW_FAR_PLANE,
            shader_dir: PathBuf::from(BUILD_SPIRV_DIR),
            effect_config_dir: PathBuf::from("data/configs"),
            effects: vec![
                "chromatic_aberration".to_string(),
                "vignette".to_string(),
                "tonemap".to_string(),
            ],
            timing_queries: DEFAULT_TIMING_QUERIES,
            max_lights: DEFAULT_MAX_LIGHTS,
            enable_directional_lights: true,
            enable_point_lights: true,
        }
    }
}

impl RendererConfig {
    /// Reject settings the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let needed = 2 * TIMED_PASS_COUNT;
        if self.timing_queries < needed {
            return Err(RenderError::Config(format!(
                "timing_queries is {}, each frame writes {needed} timestamps",
                self.timing_queries
            )));
        }
        if self.shadow_resolution == 0 {
            return Err(RenderError::Config("shadow_resolution must be positive".to_string()));
        }
        if !(self.shadow_far_plane.is_finite() && self.shadow_far_plane > 0.0) {
            return Err(RenderError::Config(format!(
                "shadow_far_plane must be positive, got {}",
                self.shadow_far_plane
            )));
        }
        Ok(())
    }

    /// Path of a compiled shader binary.
    pub fn shader_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(format!("{name}.spv"))
    }

    /// Path of an effect's parameter defaults.
    pub fn effect_config_path(&self, effect: &str) -> PathBuf {
        self.effect_config_dir.join(format!("{effect}.ini"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.shadow_resolution, 2048);
        assert_eq!(config.shadow_far_plane, SHADOW_FAR_PLANE);
        assert_eq!(config.timing_queries, 32);
        assert_eq!(config.max_lights, 64);
        assert!(config.enable_directional_lights);
        assert!(config.enable_point_lights);
        assert_eq!(config.effects.last().map(String::as_str), Some("tonemap"));
    }

    #[test]
    fn test_paths() {
        let config = RendererConfig {
            shader_dir: PathBuf::from("spv"),
            effect_config_dir: PathBuf::from("cfg"),
            ..RendererConfig::default()
        };
        assert_eq!(config.shader_path("quad.vert"), PathBuf::from("spv/quad.vert.spv"));
        assert_eq!(config.effect_config_path("vignette"), PathBuf::from("cfg/vignette.ini"));
    }

    #[test]
    fn test_validate() {
        assert!(RendererConfig::default().validate().is_ok());

        let few_queries = RendererConfig {
            timing_queries: 2 * TIMED_PASS_COUNT - 1,
            ..RendererConfig::default()
        };
        assert!(matches!(few_queries.validate(), Err(RenderError::Config(_))));

        let exact = RendererConfig {
            timing_queries: 2 * TIMED_PASS_COUNT,
            ..RendererConfig::default()
        };
        assert!(exact.validate().is_ok());

        let flat = RendererConfig {
            shadow_far_plane: 0.0,
            ..RendererConfig::default()
        };
        assert!(flat.validate().is_err());
    }
}
