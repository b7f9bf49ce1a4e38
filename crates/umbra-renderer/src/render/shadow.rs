//! One-shot shadow-map generation.
//!
//! Runs once after the scene is uploaded. Directional lights get a 2D depth
//! map rendered with their fitted orthographic matrix; point lights get a
//! cube map rendered face by face, storing linear distance over the far
//! plane. Every map ends in `SHADER_READ_ONLY_OPTIMAL`, is registered in
//! the bindless array and linked back onto its light.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::scene::light_space::{cube_face_views, point_light_projection};
use crate::scene::{Light, Scene, Vertex};
use crate::vulkan::debug::PASS_LABEL_COLOR;
use crate::vulkan::descriptors::create_pipeline_layout;
use crate::vulkan::image::Transition;
use crate::vulkan::memory::ImageDesc;
use crate::vulkan::pipeline::{set_viewport, DepthBias, DepthState};
use crate::vulkan::rendering::{begin_rendering, depth_attachment};
use crate::vulkan::shader::ShaderModules;
use crate::vulkan::{
    BindlessTextures, CommandManager, GraphicsPipelineDesc, MemoryManager, PipelineCache, TrackedImage,
    VulkanContext,
};

pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const SHADOW_DEPTH_BIAS: DepthBias = DepthBias {
    constant: 1.25,
    slope: 1.0,
};

/// Directional push constants: diffuse index for the fragment stage at 0,
/// light-space matrix for the vertex stage at 16.
const DIRECTIONAL_DIFFUSE_OFFSET: u32 = 0;
const DIRECTIONAL_MATRIX_OFFSET: u32 = 16;

/// Push constants of one cube-face draw, shared by both stages.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PointShadowPush {
    /// xyz light position, w far plane.
    light: Vec4,
    light_space: Mat4,
    diffuse: u32,
    _pad: [u32; 3],
}

/// Size of [`PointShadowPush`] as declared in the shaders (no tail padding).
const POINT_PUSH_SIZE: u32 = 84;

/// Shadow maps of a scene.
pub struct ShadowMaps {
    maps: Vec<ShadowMap>,
}

struct ShadowMap {
    image: TrackedImage,
    /// One 2D view per cube face; empty for directional maps.
    face_views: Vec<vk::ImageView>,
}

impl ShadowMaps {
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub unsafe fn destroy(self, ctx: &VulkanContext, memory: &MemoryManager) {
        for map in self.maps {
            for view in map.face_views {
                ctx.device.destroy_image_view(view, None);
            }
            memory.destroy_image(map.image);
        }
    }
}

struct ShadowPipelines {
    directional_layout: vk::PipelineLayout,
    point_layout: vk::PipelineLayout,
    directional: vk::Pipeline,
    point: vk::Pipeline,
}

impl ShadowPipelines {
    unsafe fn new(
        ctx: &VulkanContext,
        cache: &PipelineCache,
        bindless: &BindlessTextures,
        config: &RendererConfig,
    ) -> Result<Self> {
        let paths = [
            config.shader_path("transform_to_lightspace.vert"),
            config.shader_path("alpha_discard.frag"),
            config.shader_path("frag_depth_override.frag"),
        ];
        let modules = ShaderModules::load(ctx, &[paths[0].as_path(), paths[1].as_path(), paths[2].as_path()])?;
        let [vertex, alpha_discard, depth_override] = [modules.0[0], modules.0[1], modules.0[2]];

        let set_layouts = [bindless.layout];
        let directional_ranges = [
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                offset: DIRECTIONAL_DIFFUSE_OFFSET,
                size: 4,
            },
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: DIRECTIONAL_MATRIX_OFFSET,
                size: 64,
            },
        ];
        let directional_layout = match create_pipeline_layout(&ctx.device, &set_layouts, &directional_ranges) {
            Ok(layout) => layout,
            Err(e) => {
                modules.destroy(ctx);
                return Err(e);
            }
        };

        let point_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: POINT_PUSH_SIZE,
        }];
        let point_layout = match create_pipeline_layout(&ctx.device, &set_layouts, &point_ranges) {
            Ok(layout) => layout,
            Err(e) => {
                ctx.device.destroy_pipeline_layout(directional_layout, None);
                modules.destroy(ctx);
                return Err(e);
            }
        };

        let bindings = Vertex::binding_descriptions();
        let attributes = Vertex::attribute_descriptions();
        let desc = |name, fragment, layout| GraphicsPipelineDesc {
            name,
            vertex,
            fragment,
            layout,
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            color_formats: &[],
            depth_format: SHADOW_MAP_FORMAT,
            depth: DepthState::WRITE_LESS,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: Some(SHADOW_DEPTH_BIAS),
        };

        let mut pipelines = Self {
            directional_layout,
            point_layout,
            directional: vk::Pipeline::null(),
            point: vk::Pipeline::null(),
        };
        let built = (|| -> Result<()> {
            pipelines.directional =
                cache.create_graphics(ctx, &desc("DirectionalShadow", alpha_discard, directional_layout))?;
            pipelines.point = cache.create_graphics(ctx, &desc("PointShadow", depth_override, point_layout))?;
            Ok(())
        })();
        modules.destroy(ctx);

        match built {
            Ok(()) => Ok(pipelines),
            Err(e) => {
                pipelines.destroy(ctx);
                Err(e)
            }
        }
    }

    unsafe fn destroy(self, ctx: &VulkanContext) {
        ctx.device.destroy_pipeline(self.directional, None);
        ctx.device.destroy_pipeline(self.point, None);
        ctx.device.destroy_pipeline_layout(self.directional_layout, None);
        ctx.device.destroy_pipeline_layout(self.point_layout, None);
    }
}

/// Render every light's shadow map, blocking until the GPU is done, then
/// register the maps and link them onto the scene's lights.
pub unsafe fn generate_shadow_maps(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    commands: &CommandManager,
    cache: &PipelineCache,
    bindless: &mut BindlessTextures,
    config: &RendererConfig,
    scene: &mut Scene,
) -> Result<ShadowMaps> {
    let lights: Vec<Light> = scene.lights.as_slice().to_vec();
    if lights.is_empty() {
        return Ok(ShadowMaps { maps: Vec::new() });
    }
    if scene.light_matrices.len() < scene.lights.directional_count() as usize {
        return Err(RenderError::Unsupported(format!(
            "{} directional lights but {} light-space matrices",
            scene.lights.directional_count(),
            scene.light_matrices.len()
        )));
    }

    let extent = vk::Extent2D {
        width: config.shadow_resolution,
        height: config.shadow_resolution,
    };

    let mut shadow_maps = ShadowMaps {
        maps: Vec::with_capacity(lights.len()),
    };
    for (i, light) in lights.iter().enumerate() {
        match create_shadow_map(ctx, memory, &format!("ShadowMap[{i}]"), extent, light.is_point()) {
            Ok(map) => shadow_maps.maps.push(map),
            Err(e) => {
                shadow_maps.destroy(ctx, memory);
                return Err(e);
            }
        }
    }

    let pipelines = match ShadowPipelines::new(ctx, cache, bindless, config) {
        Ok(pipelines) => pipelines,
        Err(e) => {
            shadow_maps.destroy(ctx, memory);
            return Err(e);
        }
    };

    let recorded = (|| -> Result<()> {
        let cmd = commands.begin_single_time()?;
        ctx.debug.begin_label(cmd, "Shadow Maps", PASS_LABEL_COLOR);
        set_viewport(&ctx.device, cmd, extent);

        for (light, map) in lights.iter().zip(shadow_maps.maps.iter_mut()) {
            if light.is_directional() {
                let matrix = scene.light_matrices[light.matrix_index as usize];
                record_directional(ctx, cmd, &pipelines, bindless, scene, map, matrix, extent);
            } else {
                record_point(ctx, cmd, &pipelines, bindless, scene, map, light, config.shadow_far_plane, extent);
            }
        }

        ctx.debug.end_label(cmd);
        commands.end_single_time(ctx, cmd)
    })();

    pipelines.destroy(ctx);
    if let Err(e) = recorded {
        shadow_maps.destroy(ctx, memory);
        return Err(e);
    }

    for (light_index, map) in shadow_maps.maps.iter().enumerate() {
        let index = bindless.register(map.image.view)?;
        scene.lights.link_shadow_map_index(light_index, index);
    }
    bindless.flush(&ctx.device);

    log::info!(
        "{} shadow maps generated at {}x{}",
        shadow_maps.len(),
        extent.width,
        extent.height
    );
    Ok(shadow_maps)
}

unsafe fn create_shadow_map(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    name: &str,
    extent: vk::Extent2D,
    cube: bool,
) -> Result<ShadowMap> {
    let desc = ImageDesc {
        array_layers: if cube { 6 } else { 1 },
        cube,
        ..ImageDesc::depth_target(name, extent, SHADOW_MAP_FORMAT)
    };
    let image = memory.create_image(&desc)?;
    ctx.debug.name_object(image.handle, name);

    let mut face_views = Vec::new();
    if cube {
        for face in 0..6 {
            match image.create_layer_view(&ctx.device, face) {
                Ok(view) => face_views.push(view),
                Err(result) => {
                    for view in face_views {
                        ctx.device.destroy_image_view(view, None);
                    }
                    memory.destroy_image(image);
                    return Err(RenderError::Vulkan {
                        what: "create cube face view",
                        result,
                    });
                }
            }
        }
    }
    Ok(ShadowMap { image, face_views })
}

#[allow(clippy::too_many_arguments)]
unsafe fn record_directional(
    ctx: &VulkanContext,
    cmd: vk::CommandBuffer,
    pipelines: &ShadowPipelines,
    bindless: &BindlessTextures,
    scene: &Scene,
    map: &mut ShadowMap,
    light_space: Mat4,
    extent: vk::Extent2D,
) {
    let device = &ctx.device;
    map.image.transition(device, cmd, &Transition::to_depth_attachment());

    let depth = depth_attachment(map.image.view, Some(1.0));
    begin_rendering(device, cmd, extent, &[], Some(&depth));

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipelines.directional);
    device.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        pipelines.directional_layout,
        0,
        &[bindless.set],
        &[],
    );
    device.cmd_push_constants(
        cmd,
        pipelines.directional_layout,
        vk::ShaderStageFlags::VERTEX,
        DIRECTIONAL_MATRIX_OFFSET,
        bytemuck::bytes_of(&light_space),
    );
    for mesh in &scene.meshes {
        device.cmd_push_constants(
            cmd,
            pipelines.directional_layout,
            vk::ShaderStageFlags::FRAGMENT,
            DIRECTIONAL_DIFFUSE_OFFSET,
            bytemuck::bytes_of(&mesh.textures.diffuse),
        );
        mesh.draw(device, cmd);
    }

    device.cmd_end_rendering(cmd);
    map.image.transition(device, cmd, &Transition::depth_to_shader_read());
}

#[allow(clippy::too_many_arguments)]
unsafe fn record_point(
    ctx: &VulkanContext,
    cmd: vk::CommandBuffer,
    pipelines: &ShadowPipelines,
    bindless: &BindlessTextures,
    scene: &Scene,
    map: &mut ShadowMap,
    light: &Light,
    far_plane: f32,
    extent: vk::Extent2D,
) {
    let device = &ctx.device;
    map.image.transition(device, cmd, &Transition::to_depth_attachment());

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipelines.point);
    device.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        pipelines.point_layout,
        0,
        &[bindless.set],
        &[],
    );

    let projection = point_light_projection(far_plane);
    let views = cube_face_views(light.xyz());
    let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

    for (face, view) in views.iter().enumerate() {
        let depth = depth_attachment(map.face_views[face], Some(1.0));
        begin_rendering(device, cmd, extent, &[], Some(&depth));

        let mut push = PointShadowPush {
            light: light.xyz().extend(far_plane),
            light_space: projection * *view,
            diffuse: 0,
            _pad: [0; 3],
        };
        for mesh in &scene.meshes {
            push.diffuse = mesh.textures.diffuse;
            let bytes = bytemuck::bytes_of(&push);
            device.cmd_push_constants(cmd, pipelines.point_layout, stages, 0, &bytes[..POINT_PUSH_SIZE as usize]);
            mesh.draw(device, cmd);
        }

        device.cmd_end_rendering(cmd);
        let range = map.image.layer_range(face as u32);
        map.image
            .transition_range(device, cmd, &Transition::depth_to_shader_read(), range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::SubresourceStates;

    #[test]
    fn test_point_push_layout() {
        assert_eq!(std::mem::offset_of!(PointShadowPush, light_space), 16);
        assert_eq!(std::mem::offset_of!(PointShadowPush, diffuse), 80);
        // Only the declared prefix is pushed; the tail is alignment padding.
        assert_eq!(std::mem::offset_of!(PointShadowPush, _pad) as u32, POINT_PUSH_SIZE);
    }

    #[test]
    fn test_cube_faces_end_shader_readable() {
        // Mirror the per-face barrier sequence on the tracker alone.
        let mut image = TrackedImage {
            handle: vk::Image::null(),
            view: vk::ImageView::null(),
            allocation: None,
            format: SHADOW_MAP_FORMAT,
            extent: vk::Extent2D { width: 8, height: 8 },
            aspect: vk::ImageAspectFlags::DEPTH,
            states: SubresourceStates::new(1, 6),
            name: "ShadowMap[0]".to_string(),
        };
        let full = image.full_range();
        let first = image.plan_transition(&Transition::to_depth_attachment(), full);
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);

        for face in 0..6 {
            let range = image.layer_range(face);
            let barrier = image.plan_transition(&Transition::depth_to_shader_read(), range);
            assert_eq!(barrier.old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
            for later in face + 1..6 {
                assert_eq!(image.states.layout(0, later), vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
            }
        }
        assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(
            image.states.uniform_layout(&full),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }
}
