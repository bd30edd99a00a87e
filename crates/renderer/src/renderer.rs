//! Main renderer orchestration.
//!
//! [`Renderer`] owns the Vulkan instance, surface, device and [`RenderGraph`],
//! and runs the frame loop through a [`FrameScheduler`].
//!
//! # Resource Destruction Order
//!
//! 1. Wait for all GPU work to complete
//! 2. Drop the debug overlay
//! 3. Drop the render graph (frame slots, passes, swapchain)
//! 4. Release the device
//! 5. Destroy the surface
//! 6. Destroy the instance
//!
//! ManuallyDrop is used to enforce this order.

use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use glam::Vec2;
use tracing::{debug, error, info};

use renderer_core::Config;
use renderer_platform::{Surface, Window};
use renderer_resources::{load_binary_blob, load_image, store_png};
use renderer_rhi::device::Device;
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::select_physical_device;
use renderer_rhi::swapchain::{AcquireOutcome, PresentOutcome};

use crate::error::{RendererError, RendererResult};
use crate::graph::{GraphSettings, RenderGraph, ShaderBlobs};
use crate::overlay::{DebugOverlay, OverlayInitInfo, notify_rebuilt};
use crate::scheduler::{FrameBackend, FrameInput, FrameScheduler, FrameStatus};
use crate::stats::{FrameStats, StatsTracker};
use crate::ubo::FrameUniforms;
use crate::viewport::Upscale;

/// File names of the four SPIR-V blobs inside the shader directory, in
/// [`ShaderBlobs`] field order.
pub const SHADER_FILES: [&str; 4] = [
    "offscreen.vert.spv",
    "offscreen.frag.spv",
    "final.vert.spv",
    "final.frag.spv",
];

fn shader_paths(dir: &Path) -> [PathBuf; 4] {
    SHADER_FILES.map(|name| dir.join(name))
}

fn load_asset(path: &Path) -> RendererResult<Vec<u8>> {
    load_binary_blob(path).map_err(|source| RendererError::Asset {
        name: path.display().to_string(),
        source,
    })
}

fn load_shaders(dir: &Path) -> RendererResult<ShaderBlobs> {
    let [offscreen_vertex, offscreen_fragment, final_vertex, final_fragment] = shader_paths(dir);
    Ok(ShaderBlobs {
        offscreen_vertex: load_asset(&offscreen_vertex)?,
        offscreen_fragment: load_asset(&offscreen_fragment)?,
        final_vertex: load_asset(&final_vertex)?,
        final_fragment: load_asset(&final_fragment)?,
    })
}

fn overlay_init_info(instance: &Instance, graph: &RenderGraph) -> OverlayInitInfo {
    let device = graph.device();
    OverlayInitInfo {
        instance: instance.handle().handle(),
        physical_device: device.physical_device(),
        device: device.handle().handle(),
        queue_family: device.queue_families().graphics,
        queue: device.graphics_queue(),
        render_pass: graph.final_render_pass(),
        subpass: 0,
        min_image_count: graph.swapchain().min_image_count(),
        image_count: graph.swapchain().image_count() as u32,
    }
}

/// The render graph seen through the scheduler's step interface.
struct GpuFrame<'a> {
    graph: &'a mut RenderGraph,
    instance: &'a Instance,
    surface: vk::SurfaceKHR,
    overlay: &'a mut Option<Box<dyn DebugOverlay>>,
    stats: &'a mut StatsTracker,
}

impl FrameBackend for GpuFrame<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        Ok(self.graph.wait_for_slot(slot)?)
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome> {
        Ok(self.graph.acquire(slot)?)
    }

    fn write_uniforms(&mut self, slot: usize, input: &FrameInput) -> RendererResult<()> {
        let uniforms =
            FrameUniforms::for_frame(self.graph.upscale(), input.cursor, input.time_seconds);
        Ok(self.graph.write_uniforms(slot, &uniforms)?)
    }

    fn reset_fence(&mut self, slot: usize) -> RendererResult<()> {
        Ok(self.graph.reset_fence(slot)?)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        self.graph
            .record(slot, image_index, installed(self.overlay), self.stats.stats())
    }

    fn submit(&mut self, slot: usize) -> RendererResult<()> {
        Ok(self.graph.submit(slot)?)
    }

    fn recover_slot(&mut self, slot: usize) -> RendererResult<()> {
        Ok(self.graph.recover_slot(slot)?)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<PresentOutcome> {
        Ok(self.graph.present(slot, image_index)?)
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.graph.rebuild(self.instance, self.surface, extent)?;
        self.stats.set_upscale(self.graph.upscale());

        let info = overlay_init_info(self.instance, self.graph);
        notify_rebuilt(installed(self.overlay), &info)
    }
}

fn installed(overlay: &mut Option<Box<dyn DebugOverlay>>) -> Option<&mut dyn DebugOverlay> {
    match overlay {
        Some(overlay) => Some(&mut **overlay),
        None => None,
    }
}

/// Low-resolution renderer for one window.
pub struct Renderer {
    overlay: Option<Box<dyn DebugOverlay>>,
    graph: ManuallyDrop<RenderGraph>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,

    scheduler: FrameScheduler,
    stats: StatsTracker,
    /// Engine time of the last presented frame.
    last_present: Option<f32>,
}

impl Renderer {
    /// Creates a renderer for `window`.
    ///
    /// Loads the four shader blobs from `config.assets.shader_dir` and the
    /// texture from `config.assets.texture`, selects a GPU able to present to
    /// the window, and builds the swapchain and both passes.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Asset`] if an asset cannot be read, and
    /// [`RendererError::Rhi`] if any Vulkan object cannot be created.
    pub fn new(window: &Window, config: &Config) -> RendererResult<Self> {
        let renderer_config = &config.renderer;
        let (width, height) = window.framebuffer_size();
        let offscreen_extent = vk::Extent2D {
            width: renderer_config.offscreen_width,
            height: renderer_config.offscreen_height,
        };

        info!(
            "Initializing renderer: window {}x{}, offscreen {}x{}",
            width, height, offscreen_extent.width, offscreen_extent.height
        );

        let shaders = load_shaders(&config.assets.shader_dir)?;
        let texture = load_image(&config.assets.texture).map_err(|source| RendererError::Asset {
            name: config.assets.texture.display().to_string(),
            source,
        })?;
        debug!(
            "Texture {} loaded: {}x{}",
            config.assets.texture.display(),
            texture.width,
            texture.height
        );

        let instance = Instance::new(
            renderer_config.validation,
            window.required_surface_extensions()?,
        )?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Selected GPU: {} ({})",
            physical_device_info.device_name(),
            physical_device_info.device_type_name()
        );

        let device = Device::new(&instance, &physical_device_info)?;

        let settings = GraphSettings {
            offscreen_extent,
            framebuffer_extent: vk::Extent2D { width, height },
            frames_in_flight: renderer_config.frames_in_flight as usize,
            clear_color: renderer_config.clear_color,
            fastest: renderer_config.present_mode.is_fastest(),
        };
        let graph = RenderGraph::new(
            &instance,
            device.clone(),
            surface.handle(),
            &shaders,
            &texture,
            &settings,
        )?;

        let scheduler = FrameScheduler::new(graph.slot_count(), graph.swapchain().extent());
        let stats = StatsTracker::new(graph.upscale());

        info!(
            "Renderer initialized: {} frames in flight, present mode {:?}",
            graph.slot_count(),
            graph.swapchain().present_mode()
        );

        Ok(Self {
            overlay: None,
            graph: ManuallyDrop::new(graph),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            scheduler,
            stats,
            last_present: None,
        })
    }

    /// Notes a new framebuffer size. Repeated calls before the next frame
    /// collapse into a single swapchain rebuild.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.scheduler.request_resize(width, height);
    }

    /// Renders and presents one frame.
    ///
    /// `time_seconds` is engine time and `cursor` the cursor position in
    /// window pixels.
    pub fn draw_frame(&mut self, time_seconds: f32, cursor: Vec2) -> RendererResult<FrameStatus> {
        let input = FrameInput {
            time_seconds,
            cursor,
        };
        let mut frame = GpuFrame {
            graph: &mut self.graph,
            instance: &self.instance,
            surface: self.surface.handle(),
            overlay: &mut self.overlay,
            stats: &mut self.stats,
        };
        let status = self.scheduler.draw_frame(&mut frame, &input)?;

        if let FrameStatus::Presented { .. } = status {
            let delta = self
                .last_present
                .map_or(0.0, |last| (time_seconds - last).max(0.0));
            self.last_present = Some(time_seconds);

            if self.stats.record_frame(Duration::from_secs_f32(delta)) {
                let stats = self.stats.stats();
                debug!(
                    "{:.1} fps ({:.2} ms), {} frames",
                    stats.fps, stats.frame_time_ms, stats.frame_count
                );
            }
        }

        Ok(status)
    }

    /// Installs `overlay`, replacing any previous one.
    ///
    /// The overlay is initialised against the current final pass right away.
    pub fn set_overlay(&mut self, mut overlay: Box<dyn DebugOverlay>) -> RendererResult<()> {
        self.device.wait_idle()?;
        notify_rebuilt(
            Some(&mut *overlay),
            &overlay_init_info(&self.instance, &self.graph),
        )?;
        self.overlay = Some(overlay);
        info!("Debug overlay installed");
        Ok(())
    }

    pub fn stats(&self) -> &FrameStats {
        self.stats.stats()
    }

    pub fn upscale(&self) -> &Upscale {
        self.graph.upscale()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Writes the offscreen image, as last rendered, to a PNG at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidState`] before the first presented frame.
    pub fn capture_offscreen(&self, path: impl AsRef<Path>) -> RendererResult<()> {
        if self.scheduler.frames_presented() == 0 {
            return Err(RendererError::InvalidState(
                "no frame has been rendered yet".to_string(),
            ));
        }

        let pixels = self.graph.read_offscreen()?;
        let extent = self.graph.offscreen_extent();
        store_png(path.as_ref(), extent.width, extent.height, &pixels)
            .map_err(RendererError::Capture)?;

        info!(
            "Captured {}x{} offscreen image to {}",
            extent.width,
            extent.height,
            path.as_ref().display()
        );
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Wait for all GPU work to complete before destroying resources
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }

        // The overlay may own objects created on this device
        self.overlay = None;

        unsafe {
            ManuallyDrop::drop(&mut self.graph);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}
