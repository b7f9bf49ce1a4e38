//! Vertex layout shared by every mesh pipeline.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// One vertex. Locations 0..=4 in declaration order, single binding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv: Vec2,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl Vertex {
    pub fn new(position: Vec3, uv: Vec2, normal: Vec3, tangent: Vec3) -> Self {
        Self {
            position,
            uv,
            normal,
            tangent,
            bitangent: normal.cross(tangent),
        }
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 5] {
        let attr = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        [
            attr(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, position)),
            attr(1, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Vertex, uv)),
            attr(2, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, normal)),
            attr(3, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, tangent)),
            attr(4, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, bitangent)),
        ]
    }
}

/// Bindless indices of a mesh's material textures, pushed per draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureIndices {
    pub diffuse: u32,
    pub normals: u32,
    pub metalness: u32,
    pub roughness: u32,
}
