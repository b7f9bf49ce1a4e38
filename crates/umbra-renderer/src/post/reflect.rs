//! Push-constant reflection of post-processing fragment shaders.

use naga::{AddressSpace, ScalarKind, TypeInner, VectorSize};

use super::params::{ParamKind, ParamSlot, PushConstantLayout, READ_INDEX_OFFSET, TIME_OFFSET};
use crate::error::{RenderError, Result};

/// Parse SPIR-V and reflect its push-constant block.
pub fn reflect_push_constants(spirv: &[u8], shader: &str) -> Result<PushConstantLayout> {
    let options = naga::front::spv::Options {
        adjust_coordinate_space: false,
        strict_capabilities: false,
        block_ctx_dump_prefix: None,
    };
    let module = naga::front::spv::parse_u8_slice(spirv, &options).map_err(|e| RenderError::Reflection {
        shader: shader.to_string(),
        reason: e.to_string(),
    })?;
    layout_from_module(&module, shader)
}

/// Find the single push-constant struct, check its `(u64 time, u32 index)`
/// header and map every later member to a parameter slot.
pub fn layout_from_module(module: &naga::Module, shader: &str) -> Result<PushConstantLayout> {
    let fail = |reason: String| RenderError::Reflection {
        shader: shader.to_string(),
        reason,
    };

    let mut blocks = module
        .global_variables
        .iter()
        .filter(|(_, var)| var.space == AddressSpace::Immediate);
    let (_, block) = blocks
        .next()
        .ok_or_else(|| fail("no push-constant block".to_string()))?;
    if blocks.next().is_some() {
        return Err(fail("more than one push-constant block".to_string()));
    }

    let TypeInner::Struct { members, span } = &module.types[block.ty].inner else {
        return Err(fail("push-constant block is not a struct".to_string()));
    };

    let header_ok = members.len() >= 2
        && members[0].offset == TIME_OFFSET
        && is_scalar(module, members[0].ty, ScalarKind::Uint, 8)
        && members[1].offset == READ_INDEX_OFFSET
        && is_scalar(module, members[1].ty, ScalarKind::Uint, 4);
    if !header_ok {
        return Err(fail("block must start with (uint64_t time, uint index)".to_string()));
    }

    let params = members[2..]
        .iter()
        .enumerate()
        .map(|(i, member)| {
            let name = member.name.clone().unwrap_or_else(|| format!("param{}", i + 2));
            let kind = param_kind(&module.types[member.ty].inner)
                .ok_or_else(|| fail(format!("member {name} has an unsupported type")))?;
            Ok(ParamSlot {
                name,
                kind,
                offset: member.offset,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    log::debug!("{shader}: {} push-constant bytes, {} parameters", span, params.len());
    Ok(PushConstantLayout { size: *span, params })
}

fn is_scalar(module: &naga::Module, ty: naga::Handle<naga::Type>, kind: ScalarKind, width: u8) -> bool {
    matches!(module.types[ty].inner, TypeInner::Scalar(s) if s.kind == kind && s.width == width)
}

fn param_kind(inner: &TypeInner) -> Option<ParamKind> {
    match *inner {
        TypeInner::Scalar(s) if s.width == 4 => match s.kind {
            ScalarKind::Sint => Some(ParamKind::Int),
            ScalarKind::Uint => Some(ParamKind::UInt),
            ScalarKind::Float => Some(ParamKind::Float),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar == naga::Scalar::F32 => Some(match size {
            VectorSize::Bi => ParamKind::Vec2,
            VectorSize::Tri => ParamKind::Vec3,
            VectorSize::Quad => ParamKind::Vec4,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naga::{Scalar, Span, StructMember, Type};

    fn add_type(module: &mut naga::Module, inner: TypeInner) -> naga::Handle<Type> {
        module.types.insert(Type { name: None, inner }, Span::UNDEFINED)
    }

    fn member(name: &str, ty: naga::Handle<Type>, offset: u32) -> StructMember {
        StructMember {
            name: Some(name.to_string()),
            ty,
            binding: None,
            offset,
        }
    }

    /// Module with one push-constant global whose struct has the given
    /// members after the header.
    fn module_with_block(extra: impl FnOnce(&mut naga::Module) -> (Vec<StructMember>, u32)) -> naga::Module {
        let mut module = naga::Module::default();
        let u64_ty = add_type(&mut module, TypeInner::Scalar(Scalar::U64));
        let u32_ty = add_type(&mut module, TypeInner::Scalar(Scalar::U32));
        let (rest, span) = extra(&mut module);
        let mut members = vec![member("time", u64_ty, 0), member("index", u32_ty, 8)];
        members.extend(rest);
        let block_ty = add_type(&mut module, TypeInner::Struct { members, span });
        module.global_variables.append(
            naga::GlobalVariable {
                name: Some("pc".to_string()),
                space: AddressSpace::Immediate,
                binding: None,
                ty: block_ty,
                init: None,
                memory_decorations: Default::default(),
            },
            Span::UNDEFINED,
        );
        module
    }

    // ============================================================
    // Layout mapping
    // ============================================================

    #[test]
    fn test_speed_and_tint() {
        let module = module_with_block(|m| {
            let float = add_type(m, TypeInner::Scalar(Scalar::F32));
            let vec3 = add_type(
                m,
                TypeInner::Vector {
                    size: VectorSize::Tri,
                    scalar: Scalar::F32,
                },
            );
            (vec![member("speed", float, 12), member("tint", vec3, 16)], 32)
        });

        let layout = layout_from_module(&module, "test.frag").unwrap();
        assert_eq!(layout.size, 32);
        assert_eq!(
            layout.params,
            vec![
                ParamSlot {
                    name: "speed".to_string(),
                    kind: ParamKind::Float,
                    offset: 12
                },
                ParamSlot {
                    name: "tint".to_string(),
                    kind: ParamKind::Vec3,
                    offset: 16
                },
            ]
        );
    }

    #[test]
    fn test_header_only_block() {
        let module = module_with_block(|_| (Vec::new(), 16));
        let layout = layout_from_module(&module, "blit.frag").unwrap();
        assert_eq!(layout, PushConstantLayout::header_only());
    }

    #[test]
    fn test_int_members() {
        let module = module_with_block(|m| {
            let int = add_type(m, TypeInner::Scalar(Scalar::I32));
            let uint = add_type(m, TypeInner::Scalar(Scalar::U32));
            (vec![member("samples", int, 12), member("mode", uint, 16)], 24)
        });
        let layout = layout_from_module(&module, "test.frag").unwrap();
        assert_eq!(layout.param("samples").unwrap().kind, ParamKind::Int);
        assert_eq!(layout.param("mode").unwrap().kind, ParamKind::UInt);
    }

    // ============================================================
    // Rejections
    // ============================================================

    #[test]
    fn test_missing_block() {
        let module = naga::Module::default();
        assert!(matches!(
            layout_from_module(&module, "x.frag"),
            Err(RenderError::Reflection { .. })
        ));
    }

    #[test]
    fn test_unsupported_member_type() {
        let module = module_with_block(|m| {
            let ivec2 = add_type(
                m,
                TypeInner::Vector {
                    size: VectorSize::Bi,
                    scalar: Scalar::I32,
                },
            );
            (vec![member("offset", ivec2, 16)], 24)
        });
        assert!(layout_from_module(&module, "x.frag").is_err());
    }

    #[test]
    fn test_bad_header() {
        let mut module = naga::Module::default();
        let float = add_type(&mut module, TypeInner::Scalar(Scalar::F32));
        let block = add_type(
            &mut module,
            TypeInner::Struct {
                members: vec![member("speed", float, 0)],
                span: 4,
            },
        );
        module.global_variables.append(
            naga::GlobalVariable {
                name: None,
                space: AddressSpace::Immediate,
                binding: None,
                ty: block,
                init: None,
                memory_decorations: Default::default(),
            },
            Span::UNDEFINED,
        );
        assert!(layout_from_module(&module, "x.frag").is_err());
    }
}
