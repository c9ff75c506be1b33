use bytemuck::{Pod, Zeroable};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{Key, NamedKey};

use glint_engine::coords::Color;
use glint_engine::device::BackendInit;
use glint_engine::logging::{LoggingConfig, init_logging};
use glint_engine::pipeline::{ArrayBinding, DrawOp, Operation, PrimitiveMode, VertexFormat};
use glint_engine::resource::{Array, ArrayData, Shader, ShaderSource};
use glint_engine::window::{Runtime, RuntimeConfig};
use glint_engine::{App, AppControl, Context, ContextConfig, Target};

const TRIANGLE_WGSL: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(1) color: vec4<f32>,
};

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(in: VsIn) -> VsOut {
    var out: VsOut;
    out.clip = vec4<f32>(in.position, 0.0, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 4],
}

const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

const BACKGROUNDS: [Color; 3] = [
    Color::new(0.08, 0.08, 0.10, 1.0),
    Color::new(0.10, 0.16, 0.24, 1.0),
    Color::new(0.20, 0.10, 0.14, 1.0),
];

fn triangle(spin: usize) -> Vec<Vertex> {
    let colors = [
        [1.0, 0.25, 0.25, 1.0],
        [0.25, 1.0, 0.35, 1.0],
        [0.3, 0.45, 1.0, 1.0],
    ];
    let positions = [[0.0, 0.7], [-0.7, -0.6], [0.7, -0.6]];

    positions
        .iter()
        .enumerate()
        .map(|(i, &position)| Vertex {
            position,
            color: colors[(i + spin) % colors.len()],
        })
        .collect()
}

/// Clears the window and draws one triangle whose vertices stream in through
/// the upload worker. Space rotates the vertex colours, `B` cycles the
/// background.
struct Studio {
    vertices: Array,
    clear: Option<Operation>,
    draw: Option<Operation>,
    spin: usize,
    background: usize,
}

impl Studio {
    fn new() -> Self {
        Self {
            vertices: Array::with_label("triangle vertices"),
            clear: None,
            draw: None,
            spin: 0,
            background: 0,
        }
    }

    fn upload_vertices(&self, ctx: &Context) {
        let data = ArrayData::from_pod(&triangle(self.spin));
        let count = data.len() as u32 / STRIDE;
        let draw = self.draw.clone();

        ctx.upload_array_async(&self.vertices, data, move |array, outcome| match outcome {
            Ok(()) => {
                log::debug!("{array:?} uploaded ({count} vertices)");
                if let Some(draw) = draw {
                    draw.set_vertex_count(count);
                }
            }
            Err(e) => log::error!("vertex upload failed: {e}"),
        });
    }
}

impl App for Studio {
    fn init(&mut self, ctx: &Context, target: &Target) -> anyhow::Result<()> {
        let shader = Shader::with_contents(ShaderSource::combined(TRIANGLE_WGSL));

        // Zero vertices until the first upload has joined.
        let draw = Operation::draw(
            DrawOp::new(shader, PrimitiveMode::Triangles, 0)
                .with_array(
                    ArrayBinding::new(self.vertices.clone(), "position", VertexFormat::Float32x2)
                        .with_stride(STRIDE),
                )
                .with_array(
                    ArrayBinding::new(self.vertices.clone(), "color", VertexFormat::Float32x4)
                        .with_stride(STRIDE)
                        .with_offset(8),
                ),
        );
        let clear = Operation::clear_with(Some(BACKGROUNDS[0]), Some(1.0));

        let pipeline = target.pipeline();
        pipeline.add_operation(clear.clone());
        pipeline.add_operation(draw.clone());

        self.clear = Some(clear);
        self.draw = Some(draw);
        self.upload_vertices(ctx);

        Ok(())
    }

    fn on_window_event(
        &mut self,
        ctx: &Context,
        target: &Target,
        event: &WindowEvent,
    ) -> AppControl {
        let WindowEvent::KeyboardInput { event, .. } = event else {
            return AppControl::Continue;
        };
        if event.state != ElementState::Pressed || event.repeat {
            return AppControl::Continue;
        }

        match &event.logical_key {
            Key::Named(NamedKey::Escape) => return AppControl::Exit,
            Key::Named(NamedKey::Space) => {
                self.spin += 1;
                self.upload_vertices(ctx);
            }
            Key::Character(c) if c.eq_ignore_ascii_case("b") => {
                self.background = (self.background + 1) % BACKGROUNDS.len();
                if let Some(clear) = &self.clear {
                    clear.set_clear_color(BACKGROUNDS[self.background]);
                }
                target.request_redraw();
            }
            _ => {}
        }

        AppControl::Continue
    }
}

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    Runtime::run(
        RuntimeConfig {
            title: "glint studio".to_string(),
            ..Default::default()
        },
        BackendInit::default(),
        ContextConfig::default(),
        Studio::new(),
    )
}
