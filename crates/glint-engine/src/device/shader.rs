use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, EntryPoint, Module, ShaderStage, TypeInner};

use crate::resource::ShaderSource;

use super::ShaderError;

/// What a draw needs to know about a shader without looking at its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reflection {
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Vertex input name -> `@location`.
    pub attributes: HashMap<String, u32>,
    /// `@binding` numbers declared in group 0.
    pub bindings: BTreeSet<u32>,
}

impl Reflection {
    /// First group-0 binding not covered by a texture in `slots`.
    ///
    /// Slot `n` covers bindings `2n` (view) and `2n + 1` (sampler).
    pub(crate) fn unbound_binding(&self, slots: &[u32]) -> Option<u32> {
        self.bindings
            .iter()
            .copied()
            .find(|&binding| !slots.contains(&(binding / 2)))
    }
}

/// Parses and validates both stages, then reflects their interface.
pub(crate) fn reflect(source: &ShaderSource) -> Result<Reflection, ShaderError> {
    let vertex = parse("vertex", &source.vertex)?;
    let fragment_owned;
    let fragment = if source.is_combined() {
        &vertex
    } else {
        fragment_owned = parse("fragment", &source.fragment)?;
        &fragment_owned
    };

    let vs = entry_point(&vertex, ShaderStage::Vertex, "vertex")?;
    let fs = entry_point(fragment, ShaderStage::Fragment, "fragment")?;

    let mut bindings = group_zero_bindings(&vertex);
    bindings.extend(group_zero_bindings(fragment));

    Ok(Reflection {
        vertex_entry: vs.name.clone(),
        fragment_entry: fs.name.clone(),
        attributes: vertex_attributes(&vertex, vs),
        bindings,
    })
}

fn parse(stage: &'static str, source: &str) -> Result<Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        stage,
        diagnostic: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| ShaderError::Validation {
            stage,
            diagnostic: e.emit_to_string(source),
        })?;

    Ok(module)
}

fn entry_point<'m>(
    module: &'m Module,
    stage: ShaderStage,
    name: &'static str,
) -> Result<&'m EntryPoint, ShaderError> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .ok_or(ShaderError::MissingEntryPoint { stage: name })
}

/// Arguments and struct members of the vertex entry point carrying
/// `@location`.
fn vertex_attributes(module: &Module, ep: &EntryPoint) -> HashMap<String, u32> {
    let mut attributes = HashMap::new();

    for arg in &ep.function.arguments {
        match (&arg.binding, &module.types[arg.ty].inner) {
            (Some(Binding::Location { location, .. }), _) => {
                if let Some(name) = &arg.name {
                    attributes.insert(name.clone(), *location);
                }
            }
            (None, TypeInner::Struct { members, .. }) => {
                for member in members {
                    if let (Some(name), Some(Binding::Location { location, .. })) =
                        (&member.name, &member.binding)
                    {
                        attributes.insert(name.clone(), *location);
                    }
                }
            }
            _ => {}
        }
    }

    attributes
}

fn group_zero_bindings(module: &Module) -> BTreeSet<u32> {
    module
        .global_variables
        .iter()
        .filter_map(|(_, var)| var.binding.as_ref())
        .filter(|rb| rb.group == 0)
        .map(|rb| rb.binding)
        .collect()
}

/// Vertex buffer slot description, part of the render pipeline key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct VertexSlot {
    pub stride: u64,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub color_format: wgpu::TextureFormat,
    pub topology: wgpu::PrimitiveTopology,
    pub slots: Vec<VertexSlot>,
}

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Linked program of one shader in one context.
pub(crate) struct Program {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    reflection: Reflection,
    /// `None` marks a key the device rejected.
    pipelines: Mutex<HashMap<PipelineKey, Option<wgpu::RenderPipeline>>>,
}

/// Compile result kept on the shader handle. A failed compile stays failed
/// until the shader is loaded again.
pub(crate) enum ProgramState {
    Ready(Program),
    Failed,
}

impl Program {
    pub(crate) fn new(
        device: &wgpu::Device,
        label: Option<&str>,
        source: &ShaderSource,
    ) -> Result<Self, ShaderError> {
        let reflection = reflect(source)?;

        let (modules, error) = super::scope::capture(device, || {
            let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label,
                source: wgpu::ShaderSource::Wgsl(source.vertex.as_str().into()),
            });
            let fragment = if source.is_combined() {
                vertex.clone()
            } else {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label,
                    source: wgpu::ShaderSource::Wgsl(source.fragment.as_str().into()),
                })
            };
            (vertex, fragment)
        });
        if let Some(err) = error {
            return Err(ShaderError::Device(err.to_string()));
        }
        let (vertex, fragment) = modules;

        Ok(Self {
            vertex,
            fragment,
            reflection,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn location(&self, attribute: &str) -> Option<u32> {
        self.reflection.attributes.get(attribute).copied()
    }

    pub(crate) fn has_binding(&self, binding: u32) -> bool {
        self.reflection.bindings.contains(&binding)
    }

    pub(crate) fn unbound_binding(&self, slots: &[u32]) -> Option<u32> {
        self.reflection.unbound_binding(slots)
    }

    /// Render pipeline for `key`, built on first use.
    ///
    /// Returns `None` if the device rejects the pipeline. The rejection is
    /// cached, so the key is not rebuilt on every draw.
    pub(crate) fn pipeline(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
    ) -> Option<wgpu::RenderPipeline> {
        let mut cache = self.pipelines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pipeline) = cache.get(key) {
            return pipeline.clone();
        }

        log::debug!(
            "building render pipeline: {:?} {:?}, {} vertex buffers",
            key.color_format,
            key.topology,
            key.slots.len()
        );

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .slots
            .iter()
            .map(|slot| {
                [wgpu::VertexAttribute {
                    format: slot.format,
                    offset: slot.offset,
                    shader_location: slot.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
            .slots
            .iter()
            .zip(&attributes)
            .map(|(slot, attrs)| wgpu::VertexBufferLayout {
                array_stride: slot.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attrs,
            })
            .collect();

        let descriptor = wgpu::RenderPipelineDescriptor {
            label: Some("glint draw pipeline"),
            // Derived from the shader; textures bind through group 0.
            layout: None,

            vertex: wgpu::VertexState {
                module: &self.vertex,
                entry_point: Some(&self.reflection.vertex_entry),
                compilation_options: Default::default(),
                buffers: &buffers,
            },

            fragment: Some(wgpu::FragmentState {
                module: &self.fragment,
                entry_point: Some(&self.reflection.fragment_entry),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),

            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },

            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),

            multiview_mask: None,
            cache: None,
        };

        let (pipeline, error) =
            super::scope::capture(device, || device.create_render_pipeline(&descriptor));
        let pipeline = match error {
            None => Some(pipeline),
            Some(err) => {
                log::warn!("render pipeline rejected; draws with this layout are skipped: {err}");
                None
            }
        };

        cache.insert(key.clone(), pipeline.clone());
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLORED: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(3) tint: vec4<f32>,
};

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) tint: vec4<f32>,
};

@vertex
fn vs_main(in: VsIn) -> VsOut {
    var out: VsOut;
    out.clip = vec4<f32>(in.position, 0.0, 1.0);
    out.tint = in.tint;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return in.tint;
}
"#;

    const TEXTURED_VS: &str = r#"
@vertex
fn main(@location(1) uv: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(uv, 0.0, 1.0);
}
"#;

    const TEXTURED_FS: &str = r#"
@group(0) @binding(0) var tex: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

@fragment
fn main(@builtin(position) p: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, samp, p.xy);
}
"#;

    #[test]
    fn struct_members_resolve_to_locations() {
        let r = reflect(&ShaderSource::combined(COLORED)).unwrap();

        assert_eq!(r.vertex_entry, "vs_main");
        assert_eq!(r.fragment_entry, "fs_main");
        assert_eq!(r.attributes.get("position"), Some(&0));
        assert_eq!(r.attributes.get("tint"), Some(&3));
        assert!(r.bindings.is_empty());
    }

    #[test]
    fn separate_stages_merge_bindings() {
        let r = reflect(&ShaderSource::new(TEXTURED_VS, TEXTURED_FS)).unwrap();

        assert_eq!(r.attributes.get("uv"), Some(&1));
        assert_eq!(r.bindings.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn texture_slots_cover_view_and_sampler() {
        let r = reflect(&ShaderSource::new(TEXTURED_VS, TEXTURED_FS)).unwrap();

        assert_eq!(r.unbound_binding(&[0]), None);
        assert_eq!(r.unbound_binding(&[]), Some(0));
        assert_eq!(r.unbound_binding(&[1]), Some(0));
    }

    #[test]
    fn syntax_error_is_reported_with_stage() {
        let err = reflect(&ShaderSource::new("fn broken(", TEXTURED_FS)).unwrap_err();
        assert!(matches!(err, ShaderError::Parse { stage: "vertex", .. }));
    }

    #[test]
    fn missing_fragment_entry_point_fails() {
        let err = reflect(&ShaderSource::new(TEXTURED_VS, TEXTURED_VS)).unwrap_err();
        assert!(matches!(
            err,
            ShaderError::MissingEntryPoint { stage: "fragment" }
        ));
    }
}
