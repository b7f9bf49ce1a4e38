//! Scene data: meshes, solid-colour textures and lights.
//!
//! Asset import is not part of the renderer; callers describe geometry on
//! the CPU with [`SceneBuilder`] and the renderer uploads it once.

pub mod light;
pub mod light_space;
pub mod shapes;
pub mod vertex;

pub use light::{Light, LightList, NO_SHADOW_MAP};
pub use vertex::{TextureIndices, Vertex};

use ash::vk;
use glam::{Mat4, Vec3};

use crate::error::{RenderError, Result};
use crate::vulkan::image::Transition;
use crate::vulkan::memory::ImageDesc;
use crate::vulkan::{BindlessTextures, Buffer, CommandManager, MemoryManager, TrackedImage, VulkanContext};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of `points`, or `None` when there are none.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| match acc {
            None => Some(Self::new(p, p)),
            Some(b) => Some(Self::new(b.min.min(p), b.max.max(p))),
        })
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Handle of a texture added to a [`SceneBuilder`]; resolved to a bindless
/// index on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureId(pub u32);

/// CPU-side mesh. `textures` holds [`TextureId`] values until upload.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: TextureIndices,
}

struct SolidTexture {
    name: String,
    rgba: [u8; 4],
}

/// Collects meshes, textures and lights before upload.
#[derive(Default)]
pub struct SceneBuilder {
    meshes: Vec<MeshData>,
    textures: Vec<SolidTexture>,
    lights: LightList,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A 1x1 texture of one colour.
    pub fn add_solid_texture(&mut self, name: impl Into<String>, rgba: [u8; 4]) -> TextureId {
        self.textures.push(SolidTexture {
            name: name.into(),
            rgba,
        });
        TextureId(self.textures.len() as u32 - 1)
    }

    pub fn add_mesh(&mut self, mesh: MeshData) {
        self.meshes.push(mesh);
    }

    pub fn add_light(&mut self, light: Light) -> u32 {
        self.lights.add_light(light)
    }

    pub fn lights(&self) -> &LightList {
        &self.lights
    }

    /// Bounds of every vertex position.
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(self.meshes.iter().flat_map(|m| m.vertices.iter().map(|v| v.position)))
            .unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO))
    }

    fn validate(&self) -> Result<()> {
        let texture_count = self.textures.len() as u32;
        for mesh in &self.meshes {
            if mesh.vertices.is_empty() || mesh.indices.is_empty() {
                return Err(RenderError::Unsupported(format!("mesh {} is empty", mesh.name)));
            }
            let t = mesh.textures;
            if [t.diffuse, t.normals, t.metalness, t.roughness]
                .iter()
                .any(|&id| id >= texture_count)
            {
                return Err(RenderError::Unsupported(format!(
                    "mesh {} references a texture that was never added",
                    mesh.name
                )));
            }
            if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= mesh.vertices.len()) {
                return Err(RenderError::Unsupported(format!(
                    "mesh {} index {bad} out of {} vertices",
                    mesh.name,
                    mesh.vertices.len()
                )));
            }
        }
        Ok(())
    }

    /// Upload everything through one staging buffer and a blocking submit,
    /// then register the textures as bindless.
    pub(crate) unsafe fn upload(
        self,
        ctx: &VulkanContext,
        memory: &MemoryManager,
        commands: &CommandManager,
        bindless: &mut BindlessTextures,
    ) -> Result<Scene> {
        self.validate()?;
        let aabb = self.aabb();

        let staging_size: usize = self
            .meshes
            .iter()
            .map(|m| std::mem::size_of_val(m.vertices.as_slice()) + std::mem::size_of_val(m.indices.as_slice()))
            .sum::<usize>()
            + 4 * self.textures.len();
        let mut staging = memory.create_staging_buffer(staging_size.max(4) as vk::DeviceSize, "SceneStaging")?;

        let mut meshes = Vec::with_capacity(self.meshes.len());
        let mut textures: Vec<TrackedImage> = Vec::with_capacity(self.textures.len());
        let mut copies: Vec<(vk::Buffer, vk::BufferCopy)> = Vec::new();
        let mut texel_offsets = Vec::with_capacity(self.textures.len());
        let mut offset = 0usize;

        let result = (|| -> Result<()> {
            for mesh in &self.meshes {
                let vertex_bytes = std::mem::size_of_val(mesh.vertices.as_slice());
                let index_bytes = std::mem::size_of_val(mesh.indices.as_slice());

                let vertex_buffer = memory.create_device_buffer(
                    vertex_bytes as vk::DeviceSize,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    &format!("{}.vertices", mesh.name),
                )?;
                let index_buffer = memory.create_device_buffer(
                    index_bytes as vk::DeviceSize,
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    &format!("{}.indices", mesh.name),
                )?;

                staging.write(offset, mesh.vertices.as_slice())?;
                copies.push((vertex_buffer.handle, buffer_copy(offset, vertex_bytes)));
                offset += vertex_bytes;

                staging.write(offset, mesh.indices.as_slice())?;
                copies.push((index_buffer.handle, buffer_copy(offset, index_bytes)));
                offset += index_bytes;

                meshes.push(Mesh {
                    name: mesh.name.clone(),
                    vertex_buffer,
                    index_buffer,
                    index_count: mesh.indices.len() as u32,
                    textures: mesh.textures,
                });
            }

            for texture in &self.textures {
                let image = memory.create_image(&ImageDesc::texture(
                    &texture.name,
                    vk::Extent2D { width: 1, height: 1 },
                    vk::Format::R8G8B8A8_UNORM,
                ))?;
                ctx.debug.name_object(image.handle, &texture.name);
                staging.write(offset, &texture.rgba[..])?;
                texel_offsets.push(offset);
                offset += 4;
                textures.push(image);
            }

            let cmd = commands.begin_single_time()?;
            for (dst, region) in &copies {
                ctx.device.cmd_copy_buffer(cmd, staging.handle, *dst, std::slice::from_ref(region));
            }
            for (image, &texel_offset) in textures.iter_mut().zip(&texel_offsets) {
                image.transition(&ctx.device, cmd, &Transition::to_transfer_dst());
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(texel_offset as vk::DeviceSize)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: 1,
                        height: 1,
                        depth: 1,
                    });
                ctx.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle,
                    image.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                image.transition(&ctx.device, cmd, &Transition::transfer_to_shader_read());
            }

            let vertex_input = [vk::MemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COPY)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_INPUT)
                .dst_access_mask(vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ)];
            ctx.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().memory_barriers(&vertex_input),
            );

            commands.end_single_time(ctx, cmd)
        })();

        memory.destroy_buffer(staging);
        if let Err(e) = result {
            for mesh in meshes {
                mesh.destroy(memory);
            }
            for texture in textures {
                memory.destroy_image(texture);
            }
            return Err(e);
        }

        // Builder ids become bindless indices.
        let mut bindless_ids = Vec::with_capacity(textures.len());
        for texture in &textures {
            bindless_ids.push(bindless.register(texture.view)?);
        }
        bindless.flush(&ctx.device);
        for mesh in &mut meshes {
            let t = &mut mesh.textures;
            for id in [&mut t.diffuse, &mut t.normals, &mut t.metalness, &mut t.roughness] {
                *id = bindless_ids[*id as usize];
            }
        }

        let light_matrices = self.lights.light_space_matrices(&aabb);
        log::info!(
            "scene uploaded: {} meshes, {} textures, {} directional + {} point lights",
            meshes.len(),
            textures.len(),
            self.lights.directional_count(),
            self.lights.point_count()
        );

        Ok(Scene {
            meshes,
            textures,
            lights: self.lights,
            aabb,
            light_matrices,
        })
    }
}

fn buffer_copy(src_offset: usize, size: usize) -> vk::BufferCopy {
    vk::BufferCopy {
        src_offset: src_offset as vk::DeviceSize,
        dst_offset: 0,
        size: size as vk::DeviceSize,
    }
}

/// GPU-resident mesh.
pub struct Mesh {
    pub name: String,
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
    /// Bindless indices.
    pub textures: TextureIndices,
}

impl Mesh {
    /// Bind vertex and index buffers and issue one indexed draw.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
    }

    unsafe fn destroy(self, memory: &MemoryManager) {
        memory.destroy_buffer(self.vertex_buffer);
        memory.destroy_buffer(self.index_buffer);
    }
}

/// Uploaded scene. Lights gain shadow-map indices once shadows are built.
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub textures: Vec<TrackedImage>,
    pub lights: LightList,
    pub aabb: Aabb,
    /// Light-space matrix of each directional light, by matrix index.
    pub light_matrices: Vec<Mat4>,
}

impl Scene {
    /// Free every buffer and image. The GPU must be idle.
    pub unsafe fn destroy(self, memory: &MemoryManager) {
        for mesh in self.meshes {
            mesh.destroy(memory);
        }
        for texture in self.textures {
            memory.destroy_image(texture);
        }
    }
}
