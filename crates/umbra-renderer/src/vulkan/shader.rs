//! SPIR-V loading and shader modules.

use ash::vk;
use std::path::Path;

use super::VulkanContext;
use crate::error::{RenderError, Result, VkResultExt};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a compiled shader into words. Missing files are fatal.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RenderError::FileNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    spirv_words(&bytes).map_err(|reason| RenderError::Reflection {
        shader: path.display().to_string(),
        reason: reason.to_string(),
    })
}

fn spirv_words(bytes: &[u8]) -> std::result::Result<Vec<u32>, &'static str> {
    if bytes.len() % 4 != 0 {
        return Err("length is not a multiple of 4");
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err("missing SPIR-V magic number");
    }
    Ok(words)
}

pub unsafe fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(words);
    device.create_shader_module(&create_info, None).vk("create shader module")
}

/// Modules that live only until their pipelines are built.
pub struct ShaderModules(pub Vec<vk::ShaderModule>);

impl ShaderModules {
    /// Load and create one module per path, in order.
    pub unsafe fn load(ctx: &VulkanContext, paths: &[&Path]) -> Result<Self> {
        let mut modules = Self(Vec::with_capacity(paths.len()));
        for path in paths {
            let module = load_spirv(path).and_then(|words| create_shader_module(&ctx.device, &words));
            match module {
                Ok(module) => modules.0.push(module),
                Err(e) => {
                    modules.destroy(ctx);
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }

    pub unsafe fn destroy(self, ctx: &VulkanContext) {
        for module in self.0 {
            ctx.device.destroy_shader_module(module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_spirv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for word in [SPIRV_MAGIC, 0x0001_0600, 0, 8, 0] {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        let words = load_spirv(file.path()).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[1], 0x0001_0600);
    }

    #[test]
    fn test_missing_shader_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_spirv(&dir.path().join("tonemap.frag.spv")).unwrap_err();
        assert!(matches!(err, RenderError::FileNotFound { .. }));
    }

    #[test]
    fn test_rejects_non_spirv() {
        assert!(spirv_words(&[1, 2, 3]).is_err());
        assert!(spirv_words(&[0; 8]).is_err());
    }
}
