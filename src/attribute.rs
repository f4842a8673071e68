//! Lookup of geometry attributes for the shading language.
//!
//! Renderers keep a map from attribute name to [`AttributeDescriptor`] for every object. Shaders
//! ask for attributes by name, standard attributes are also reachable under their `geom:` name.
//! Reading the actual data is left to the renderer through [`AttributeSource`].
use std::collections::HashMap;

use glam::{DVec2, DVec4};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{shading::ShaderData, Vec3d};

/// Prefix under which standard attributes are visible to shaders
pub const GEOM_PREFIX: &str = "geom:";

/// Attributes with a fixed meaning that the renderer may provide
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter,
)]
pub enum AttributeStandard {
    #[strum(serialize = "N")]
    VertexNormal,
    #[strum(serialize = "Ng")]
    FaceNormal,
    #[strum(serialize = "uv")]
    Uv,
    #[strum(serialize = "tangent")]
    UvTangent,
    #[strum(serialize = "tangent_sign")]
    UvTangentSign,
    #[strum(serialize = "vertex_color")]
    VertexColor,
    #[strum(serialize = "generated")]
    Generated,
    #[strum(serialize = "undeformed")]
    PositionUndeformed,
    #[strum(serialize = "undisplaced")]
    PositionUndisplaced,
    #[strum(serialize = "motion_P")]
    MotionVertexPosition,
    #[strum(serialize = "curve_intercept")]
    CurveIntercept,
    #[strum(serialize = "curve_random")]
    CurveRandom,
    #[strum(serialize = "pointiness")]
    Pointiness,
    #[strum(serialize = "density")]
    VolumeDensity,
    #[strum(serialize = "color")]
    VolumeColor,
    #[strum(serialize = "temperature")]
    VolumeTemperature,
    #[strum(serialize = "velocity")]
    VolumeVelocity,
}

impl AttributeStandard {
    #[must_use]
    pub fn standard_name(self) -> &'static str {
        self.into()
    }

    /// The name shaders use, e.g. `geom:undisplaced`
    #[must_use]
    pub fn geom_name(self) -> String {
        format!("{GEOM_PREFIX}{}", self.standard_name())
    }
}

/// What an attribute value is attached to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttributeElement {
    #[default]
    None,
    Object,
    Mesh,
    Face,
    Vertex,
    VertexMotion,
    Corner,
    Curve,
    CurveKey,
    Voxel,
}

impl AttributeElement {
    /// Values that can be read without knowing the primitive
    #[must_use]
    pub const fn is_per_object(self) -> bool {
        matches!(self, Self::Object | Self::Mesh | Self::Voxel)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    #[default]
    Float,
    Float2,
    Float3,
    Float4,
    Rgba,
}

/// Marks an attribute that does not exist
pub const ATTR_STD_NOT_FOUND: usize = usize::MAX;

/// Where the data of an attribute lives in the renderer's storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeDescriptor {
    pub offset: usize,
    pub element: AttributeElement,
    pub kind: AttributeKind,
}

impl AttributeDescriptor {
    pub const NOT_FOUND: Self = Self {
        offset: ATTR_STD_NOT_FOUND,
        element: AttributeElement::None,
        kind: AttributeKind::Float,
    };

    #[must_use]
    pub const fn is_found(&self) -> bool {
        self.offset != ATTR_STD_NOT_FOUND
    }
}

impl Default for AttributeDescriptor {
    fn default() -> Self {
        Self::NOT_FOUND
    }
}

/// The attributes of one object by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    map: HashMap<String, AttributeDescriptor>,
}

impl ObjectAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, desc: AttributeDescriptor) {
        self.map.insert(name.into(), desc);
    }

    /// Registers a standard attribute under its plain and its `geom:` name
    pub fn insert_standard(&mut self, std: AttributeStandard, desc: AttributeDescriptor) {
        self.map.insert(std.standard_name().to_owned(), desc);
        self.map.insert(std.geom_name(), desc);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.map.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// An attribute value with its screen space derivatives
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual<T> {
    pub val: T,
    pub dx: T,
    pub dy: T,
}

impl<T: Default> Dual<T> {
    #[must_use]
    pub fn constant(val: T) -> Self {
        Self {
            val,
            dx: T::default(),
            dy: T::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttributeValue {
    Float(Dual<f64>),
    Float2(Dual<DVec2>),
    Float3(Dual<Vec3d>),
    Float4(Dual<DVec4>),
}

/// Access to the renderer's attribute storage
pub trait AttributeSource {
    fn object_attributes(&self, object: usize) -> Option<&ObjectAttributes>;

    /// Resolves objects referenced by name from a shader
    fn object_by_name(&self, _name: &str) -> Option<usize> {
        None
    }

    fn read_attribute_float(&self, sd: &ShaderData, desc: &AttributeDescriptor) -> Dual<f64>;
    fn read_attribute_float2(&self, sd: &ShaderData, desc: &AttributeDescriptor) -> Dual<DVec2>;
    fn read_attribute_float3(&self, sd: &ShaderData, desc: &AttributeDescriptor) -> Dual<Vec3d>;
    fn read_attribute_float4(&self, sd: &ShaderData, desc: &AttributeDescriptor) -> Dual<DVec4>;
}

/// Finds the descriptor of an attribute of `object`. Attributes stored per primitive can not be
/// read if the shading point has no primitive.
#[must_use]
pub fn find_attribute(
    source: &dyn AttributeSource,
    object: Option<usize>,
    prim: Option<usize>,
    name: &str,
) -> AttributeDescriptor {
    let Some(desc) = object
        .and_then(|object| source.object_attributes(object))
        .and_then(|attributes| attributes.get(name))
    else {
        return AttributeDescriptor::NOT_FOUND;
    };
    if desc.element == AttributeElement::None {
        return AttributeDescriptor::NOT_FOUND;
    }
    if prim.is_none() && !desc.element.is_per_object() {
        return AttributeDescriptor::NOT_FOUND;
    }
    *desc
}

/// [`find_attribute`] for a standard attribute of the shading point's object
#[must_use]
pub fn find_standard_attribute(
    source: &dyn AttributeSource,
    sd: &ShaderData,
    std: AttributeStandard,
) -> AttributeDescriptor {
    find_attribute(source, sd.object, sd.prim, &std.geom_name())
}

/// Reads the attribute `name` as requested by a shader. `object_name` selects another object
/// than the one being shaded.
#[must_use]
pub fn get_attribute(
    source: &dyn AttributeSource,
    sd: &ShaderData,
    object_name: Option<&str>,
    name: &str,
) -> Option<AttributeValue> {
    let object = match object_name {
        Some(object_name) => Some(source.object_by_name(object_name)?),
        None => sd.object,
    };
    let desc = find_attribute(source, object, sd.prim, name);
    if !desc.is_found() {
        return None;
    }
    Some(match desc.kind {
        AttributeKind::Float => AttributeValue::Float(source.read_attribute_float(sd, &desc)),
        AttributeKind::Float2 => AttributeValue::Float2(source.read_attribute_float2(sd, &desc)),
        AttributeKind::Float3 => AttributeValue::Float3(source.read_attribute_float3(sd, &desc)),
        AttributeKind::Float4 | AttributeKind::Rgba => {
            AttributeValue::Float4(source.read_attribute_float4(sd, &desc))
        }
    })
}
