//! Demo viewer for the deferred renderer.
//!
//! Keys 1-9 toggle post effects in chain order, arrows orbit, the wheel
//! zooms and T logs the last GPU pass timings.

mod camera;
mod cli;
mod demo;

use crossbeam::channel::Sender;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use camera::OrbitCamera;
use umbra_renderer::{EffectCommand, FrameOutcome, Renderer, RendererConfig};

type BoxError = Box<dyn std::error::Error>;

const ORBIT_STEP: f32 = 0.05;

struct Viewer {
    width: u32,
    height: u32,
    config: Option<RendererConfig>,
    camera: OrbitCamera,
    effect_names: Vec<String>,
    commands: Option<Sender<EffectCommand>>,
    // Dropped before the window it renders to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    error: Option<BoxError>,
}

impl Viewer {
    fn new(options: cli::Options) -> Self {
        Self {
            width: options.width,
            height: options.height,
            camera: OrbitCamera::new(options.width, options.height),
            config: Some(options.config),
            effect_names: Vec::new(),
            commands: None,
            renderer: None,
            window: None,
            error: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<(), BoxError> {
        let attributes = Window::default_attributes()
            .with_title("umbra")
            .with_inner_size(PhysicalSize::new(self.width, self.height));
        let window = event_loop.create_window(attributes)?;

        let config = self.config.take().unwrap_or_default();
        let mut renderer = Renderer::new(&window, config)?;
        renderer.load_scene(demo::build())?;

        self.effect_names = renderer
            .post_chain()
            .effects()
            .iter()
            .map(|effect| effect.name().to_string())
            .collect();
        log::info!("post chain: {}", self.effect_names.join(" -> "));
        self.commands = Some(renderer.command_sender());

        let size = window.inner_size();
        self.camera.set_viewport(size.width, size.height);
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: BoxError) {
        log::error!("{error}");
        self.error = Some(error);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match renderer.draw_frame(&self.camera.matrices()) {
            Ok(FrameOutcome::Recreated(extent)) => self.camera.set_viewport(extent.width, extent.height),
            Ok(FrameOutcome::Presented | FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    fn key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed {
            return;
        }
        match &event.logical_key {
            Key::Named(NamedKey::ArrowLeft) => self.camera.orbit(-ORBIT_STEP, 0.0),
            Key::Named(NamedKey::ArrowRight) => self.camera.orbit(ORBIT_STEP, 0.0),
            Key::Named(NamedKey::ArrowUp) => self.camera.orbit(0.0, ORBIT_STEP),
            Key::Named(NamedKey::ArrowDown) => self.camera.orbit(0.0, -ORBIT_STEP),
            Key::Character(c) if c.as_str() == "t" => self.log_timings(),
            Key::Character(c) => {
                let Some(digit) = c.chars().next().and_then(|ch| ch.to_digit(10)) else {
                    return;
                };
                let Some(name) = digit.checked_sub(1).and_then(|i| self.effect_names.get(i as usize)) else {
                    return;
                };
                if let Some(commands) = &self.commands {
                    if commands.send(EffectCommand::Toggle(name.clone())).is_err() {
                        log::warn!("renderer gone, dropping toggle of {name}");
                    }
                }
            }
            _ => {}
        }
    }

    fn log_timings(&self) {
        let Some(renderer) = &self.renderer else {
            return;
        };
        for (label, ms) in renderer.timings() {
            log::info!("{label}: {ms:.3} ms");
        }
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
                self.camera.set_viewport(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.logical_key == Key::Named(NamedKey::Escape) {
                    event_loop.exit();
                } else {
                    self.key(&event);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                self.camera.zoom(lines);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Device teardown waits for idle; do it before the window goes.
        self.renderer = None;
    }
}

fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = cli::parse(std::env::args().skip(1))?;
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut viewer = Viewer::new(options);
    event_loop.run_app(&mut viewer)?;

    match viewer.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
