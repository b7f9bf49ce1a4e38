//! Push-constant blocks of post-processing effects.
//!
//! Every effect block starts with the same header:
//!
//! | offset | type  | field                           |
//! |--------|-------|---------------------------------|
//! | 0      | `u64` | milliseconds since the epoch    |
//! | 8      | `u32` | ping-pong slot the effect reads |
//!
//! Members after the header are effect parameters found by reflection and
//! filled from the effect's config.

use crate::error::{RenderError, Result};

use super::ini::EffectConfig;

pub const TIME_OFFSET: u32 = 0;
pub const READ_INDEX_OFFSET: u32 = 8;
/// Header size rounded to the block's 8-byte alignment.
pub const HEADER_SIZE: u32 = 16;

/// Type of one reflected parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl ParamKind {
    pub fn components(self) -> usize {
        match self {
            ParamKind::Int | ParamKind::UInt | ParamKind::Float => 1,
            ParamKind::Vec2 => 2,
            ParamKind::Vec3 => 3,
            ParamKind::Vec4 => 4,
        }
    }

    /// Bytes occupied in the block.
    pub fn size(self) -> u32 {
        4 * self.components() as u32
    }

    /// Parse config text: one number, or comma-separated floats for vectors.
    pub fn parse(self, text: &str) -> Option<ParamValue> {
        match self {
            ParamKind::Int => text.trim().parse().ok().map(ParamValue::Int),
            ParamKind::UInt => text.trim().parse().ok().map(ParamValue::UInt),
            ParamKind::Float => text.trim().parse().ok().map(ParamValue::Float),
            ParamKind::Vec2 | ParamKind::Vec3 | ParamKind::Vec4 => {
                let floats: Vec<f32> = text
                    .split(',')
                    .map(|part| part.trim().parse::<f32>())
                    .collect::<std::result::Result<_, _>>()
                    .ok()?;
                ParamValue::from_floats(&floats).filter(|v| v.kind() == self)
            }
        }
    }
}

/// A parameter value with its type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::UInt(_) => ParamKind::UInt,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Vec2(_) => ParamKind::Vec2,
            ParamValue::Vec3(_) => ParamKind::Vec3,
            ParamValue::Vec4(_) => ParamKind::Vec4,
        }
    }

    fn from_floats(floats: &[f32]) -> Option<Self> {
        match *floats {
            [x, y] => Some(ParamValue::Vec2([x, y])),
            [x, y, z] => Some(ParamValue::Vec3([x, y, z])),
            [x, y, z, w] => Some(ParamValue::Vec4([x, y, z, w])),
            _ => None,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        let bytes: &[u8] = match self {
            ParamValue::Int(v) => bytemuck::bytes_of(v),
            ParamValue::UInt(v) => bytemuck::bytes_of(v),
            ParamValue::Float(v) => bytemuck::bytes_of(v),
            ParamValue::Vec2(v) => bytemuck::cast_slice(v),
            ParamValue::Vec3(v) => bytemuck::cast_slice(v),
            ParamValue::Vec4(v) => bytemuck::cast_slice(v),
        };
        out[..bytes.len()].copy_from_slice(bytes);
    }

    fn read_from(kind: ParamKind, bytes: &[u8]) -> Self {
        let float = |i: usize| f32::from_le_bytes(word(bytes, i));
        match kind {
            ParamKind::Int => ParamValue::Int(i32::from_le_bytes(word(bytes, 0))),
            ParamKind::UInt => ParamValue::UInt(u32::from_le_bytes(word(bytes, 0))),
            ParamKind::Float => ParamValue::Float(float(0)),
            ParamKind::Vec2 => ParamValue::Vec2([float(0), float(1)]),
            ParamKind::Vec3 => ParamValue::Vec3([float(0), float(1), float(2)]),
            ParamKind::Vec4 => ParamValue::Vec4([float(0), float(1), float(2), float(3)]),
        }
    }
}

fn word(bytes: &[u8], index: usize) -> [u8; 4] {
    let start = 4 * index;
    [bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]
}

/// One parameter member of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    pub name: String,
    pub kind: ParamKind,
    pub offset: u32,
}

/// Reflected shape of an effect's push-constant block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantLayout {
    /// Whole block in bytes, header included.
    pub size: u32,
    pub params: Vec<ParamSlot>,
}

impl PushConstantLayout {
    /// A block with only the header (the built-in blit).
    pub fn header_only() -> Self {
        Self {
            size: HEADER_SIZE,
            params: Vec::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamSlot> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Byte image of one effect's push constants, pushed whole every draw.
#[derive(Debug, Clone)]
pub struct PushConstantBlock {
    layout: PushConstantLayout,
    bytes: Vec<u8>,
}

impl PushConstantBlock {
    /// Zeroed block.
    pub fn new(layout: PushConstantLayout) -> Self {
        let bytes = vec![0; layout.size as usize];
        Self { layout, bytes }
    }

    /// Block with every parameter set from `config`. Parameters without a
    /// default stay zero; defaults that do not parse as the reflected type
    /// are errors.
    pub fn with_defaults(layout: PushConstantLayout, config: &EffectConfig) -> Result<Self> {
        let mut block = Self::new(layout);
        for i in 0..block.layout.params.len() {
            let slot = block.layout.params[i].clone();
            let Some((text, line)) = config.get(&slot.name) else {
                log::warn!("{}: no default for {}, using zero", config.path().display(), slot.name);
                continue;
            };
            let value = slot.kind.parse(text).ok_or_else(|| RenderError::EffectConfig {
                path: config.path().to_path_buf(),
                line,
                reason: format!("{} expects {:?}, got {text:?}", slot.name, slot.kind),
            })?;
            block.write(&slot, &value);
        }
        Ok(block)
    }

    pub fn layout(&self) -> &PushConstantLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn set_time(&mut self, millis: u64) {
        let at = TIME_OFFSET as usize;
        self.bytes[at..at + 8].copy_from_slice(&millis.to_le_bytes());
    }

    pub fn set_read_index(&mut self, index: u32) {
        let at = READ_INDEX_OFFSET as usize;
        self.bytes[at..at + 4].copy_from_slice(&index.to_le_bytes());
    }

    pub fn time(&self) -> u64 {
        let at = TIME_OFFSET as usize;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[at..at + 8]);
        u64::from_le_bytes(raw)
    }

    pub fn read_index(&self) -> u32 {
        u32::from_le_bytes(word(&self.bytes[READ_INDEX_OFFSET as usize..], 0))
    }

    /// Overwrite a parameter; the value's type must match the reflected one.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let slot = self
            .layout
            .param(name)
            .cloned()
            .ok_or_else(|| RenderError::UnknownParameter(name.to_string()))?;
        if slot.kind != value.kind() {
            return Err(RenderError::Unsupported(format!(
                "parameter {name} is {:?}, not {:?}",
                slot.kind,
                value.kind()
            )));
        }
        self.write(&slot, &value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        let slot = self.layout.param(name)?;
        let start = slot.offset as usize;
        Some(ParamValue::read_from(slot.kind, &self.bytes[start..start + slot.kind.size() as usize]))
    }

    fn write(&mut self, slot: &ParamSlot, value: &ParamValue) {
        let start = slot.offset as usize;
        value.write_to(&mut self.bytes[start..start + slot.kind.size() as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// `{ u64 time; uint index; float speed; vec3 tint; }` as laid out by
    /// glslc for a push-constant block.
    fn speed_tint_layout() -> PushConstantLayout {
        PushConstantLayout {
            size: 32,
            params: vec![
                ParamSlot {
                    name: "speed".to_string(),
                    kind: ParamKind::Float,
                    offset: 12,
                },
                ParamSlot {
                    name: "tint".to_string(),
                    kind: ParamKind::Vec3,
                    offset: 16,
                },
            ],
        }
    }

    fn config(text: &str) -> EffectConfig {
        EffectConfig::parse(text, Path::new("effect.ini")).unwrap()
    }

    // ============================================================
    // Defaults
    // ============================================================

    #[test]
    fn test_defaults_land_at_reflected_offsets() {
        let block = PushConstantBlock::with_defaults(
            speed_tint_layout(),
            &config("[Config]\nspeed=2.5\ntint=1.0,0.5,0.25\n"),
        )
        .unwrap();

        let bytes = block.bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[12..16], &2.5f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &0.25f32.to_le_bytes());
        // Header untouched until the first draw.
        assert!(bytes[..12].iter().all(|&b| b == 0));
        assert_eq!(block.get("tint"), Some(ParamValue::Vec3([1.0, 0.5, 0.25])));
    }

    #[test]
    fn test_missing_default_stays_zero() {
        let block = PushConstantBlock::with_defaults(speed_tint_layout(), &config("[Config]\nspeed=4\n")).unwrap();
        assert_eq!(block.get("speed"), Some(ParamValue::Float(4.0)));
        assert_eq!(block.get("tint"), Some(ParamValue::Vec3([0.0; 3])));
    }

    #[test]
    fn test_wrong_arity_is_config_error() {
        let err = PushConstantBlock::with_defaults(speed_tint_layout(), &config("[Config]\ntint=1.0,0.5\n"))
            .unwrap_err();
        assert!(matches!(err, RenderError::EffectConfig { line: 2, .. }));
    }

    // ============================================================
    // Header and updates
    // ============================================================

    #[test]
    fn test_header_fields() {
        let mut block = PushConstantBlock::new(speed_tint_layout());
        block.set_time(1_700_000_000_123);
        block.set_read_index(1);
        assert_eq!(block.time(), 1_700_000_000_123);
        assert_eq!(block.read_index(), 1);
        assert_eq!(block.get("speed"), Some(ParamValue::Float(0.0)));
    }

    #[test]
    fn test_set_checks_name_and_type() {
        let mut block = PushConstantBlock::new(speed_tint_layout());
        block.set("speed", ParamValue::Float(0.75)).unwrap();
        assert_eq!(block.get("speed"), Some(ParamValue::Float(0.75)));
        assert!(matches!(
            block.set("radius", ParamValue::Float(1.0)),
            Err(RenderError::UnknownParameter(_))
        ));
        assert!(block.set("speed", ParamValue::Int(1)).is_err());
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(ParamKind::Int.parse("-3"), Some(ParamValue::Int(-3)));
        assert_eq!(ParamKind::UInt.parse(" 7 "), Some(ParamValue::UInt(7)));
        assert_eq!(ParamKind::UInt.parse("-1"), None);
        assert_eq!(ParamKind::Vec2.parse("1, 2"), Some(ParamValue::Vec2([1.0, 2.0])));
        assert_eq!(ParamKind::Vec4.parse("1,2,3"), None);
        assert_eq!(ParamKind::Float.parse("fast"), None);
        assert_eq!(ParamKind::Vec3.size(), 12);
    }
}
