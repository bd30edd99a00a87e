//! Low-resolution Vulkan renderer - main entry point.
//!
//! Renders a textured scene into a small offscreen image and presents it
//! integer-upscaled in a resizable window.
//!
//! Keys: `F` toggles borderless fullscreen, `F12` saves the offscreen image,
//! `Escape` quits.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec2;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use renderer_core::{Config, DEFAULT_CONFIG_PATH, EngineClock};
use renderer_platform::{InputState, KeyCode, Window};
use renderer_renderer::{FrameStatus, Renderer};

/// Seconds between two frame statistics log lines.
const STATS_LOG_INTERVAL: f32 = 5.0;

#[derive(Parser, Debug)]
#[command(version, about = "Low-resolution Vulkan renderer")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply if it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

struct App {
    config: Config,
    // Dropped before the window it renders to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    input: InputState,
    clock: EngineClock,
    next_stats_log: f32,
    captures: u32,
    /// First fatal error; ends the event loop.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            input: InputState::new(),
            clock: EngineClock::new(),
            next_stats_log: STATS_LOG_INTERVAL,
            captures: 0,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let renderer =
            Renderer::new(&window, &self.config).context("Failed to create renderer")?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.clock = EngineClock::new();
        info!("Initialization complete, entering main loop");
        Ok(())
    }

    fn handle_keys(&mut self) -> Result<()> {
        if self.input.is_key_just_pressed(KeyCode::KeyF)
            && let Some(window) = &self.window
        {
            window.toggle_fullscreen();
        }

        if self.input.is_key_just_pressed(KeyCode::F12)
            && let Some(renderer) = &self.renderer
        {
            let path = PathBuf::from(format!("capture-{:03}.png", self.captures));
            match renderer.capture_offscreen(&path) {
                Ok(()) => self.captures += 1,
                // Nothing rendered yet; not worth stopping for.
                Err(renderer_renderer::RendererError::InvalidState(reason)) => {
                    debug!("Capture skipped: {}", reason)
                }
                Err(e) => return Err(e).context("Failed to capture offscreen image"),
            }
        }
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return Ok(());
        };

        if !window.is_minimized() {
            let time = self.clock.time_seconds();
            let (x, y) = self.input.cursor_position();

            let status = renderer
                .draw_frame(time, Vec2::new(x, y))
                .context("Failed to draw frame")?;
            if status == FrameStatus::OutOfDate {
                debug!("Frame skipped, swapchain was out of date");
            }

            if time >= self.next_stats_log {
                let stats = renderer.stats();
                info!(
                    "{:.1} fps ({:.2} ms) | {}x{} x{} -> {}x{} in {}x{}",
                    stats.fps,
                    stats.frame_time_ms,
                    stats.offscreen_extent.width,
                    stats.offscreen_extent.height,
                    stats.scale,
                    stats.upscaled_extent.width,
                    stats.upscaled_extent.height,
                    stats.framebuffer_extent.width,
                    stats.framebuffer_extent.height
                );
                self.next_stats_log = time + STATS_LOG_INTERVAL;
            }
        }

        self.handle_keys()?;
        self.input.end_frame();
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .on_cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
                if self.input.is_key_pressed(KeyCode::Escape) {
                    info!("Escape pressed, shutting down");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    renderer_core::init_logging(&config.logging.filter);
    info!("Starting low-resolution renderer");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Release GPU objects before reporting.
    app.renderer = None;
    match app.failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
