use std::sync::Arc;

use anyhow::{Context, Result};
use winit::window::Window;

use crate::backend::{Backend, UploadContext};
use crate::pipeline::ExecutionContext;
use crate::resource::ContextId;

use super::BackendInit;
use super::execution::WgpuExecution;
use super::upload::WgpuUploads;

/// wgpu implementation of [`Backend`].
///
/// Owns the wgpu core objects of one context:
/// - Instance/Adapter/Device/Queue
/// - the sampler shared by every texture attachment
///
/// Window surfaces are not owned here; each window target creates its own on
/// first use.
pub struct WgpuBackend {
    context_id: ContextId,
    init: BackendInit,

    /// wgpu instance used to create the adapter and surfaces.
    instance: wgpu::Instance,

    /// Selected adapter.
    adapter: wgpu::Adapter,

    /// Logical device. Cloned into the upload context.
    device: wgpu::Device,

    /// Command queue. Cloned into the upload context.
    queue: wgpu::Queue,

    sampler: wgpu::Sampler,
}

impl WgpuBackend {
    /// Creates the device, optionally picking an adapter that can present to
    /// `compatible`.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: BackendInit, compatible: Option<Arc<Window>>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        // Only used to pick the adapter; targets create their own surfaces.
        let surface = compatible
            .map(|window| instance.create_surface(window))
            .transpose()
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        drop(surface);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("glint device"),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        device.on_uncaptured_error(Arc::new(|err: wgpu::Error| {
            log::error!("wgpu: {err}");
        }));

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glint sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let context_id = ContextId::next();
        let info = adapter.get_info();
        log::info!(
            "{context_id}: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        Ok(Self {
            context_id,
            init,
            instance,
            adapter,
            device,
            queue,
            sampler,
        })
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub(crate) fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub(crate) fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub(crate) fn init(&self) -> &BackendInit {
        &self.init
    }

    pub(crate) fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }
}

impl Backend for WgpuBackend {
    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn name(&self) -> &str {
        "wgpu"
    }

    fn begin_execution(&self) -> Box<dyn ExecutionContext + '_> {
        Box::new(WgpuExecution::new(self))
    }

    fn create_upload_context(&self) -> Result<Box<dyn UploadContext>> {
        Ok(Box::new(WgpuUploads {
            context_id: self.context_id,
            device: self.device.clone(),
            queue: self.queue.clone(),
        }))
    }
}
