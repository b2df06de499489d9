pub mod overlay;
pub mod renderer;
pub mod slideshow;
pub mod transition;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use renderer::SlideRenderer;
use slideshow::SlideShow;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transition::TransitionGate;
use wgpu::{self, SurfaceError};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use crate::{
    config::Configuration,
    events::ViewerCommand,
    platform::display_power::DisplayPowerController,
    processing::{CompositorSettings, TargetSize},
    tasks::prefetch::{PictureSource, PrefetchPipeline},
};

#[derive(Debug)]
enum ViewerEvent {
    Cancelled,
}

type CommandReceiver = mpsc::Receiver<ViewerCommand>;

struct ViewerApp<S> {
    cfg: Configuration,
    cancel: CancellationToken,
    control: CommandReceiver,
    source: Option<S>,
    display_power: Option<DisplayPowerController>,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    renderer: Option<SlideRenderer>,
    pipeline: Option<PrefetchPipeline>,
    slideshow: SlideShow,
    frame_interval: Duration,
    next_frame: Instant,
}

impl<S: PictureSource + 'static> ViewerApp<S> {
    fn new(
        cfg: Configuration,
        cancel: CancellationToken,
        source: S,
        gate: TransitionGate,
        control: CommandReceiver,
    ) -> Self {
        let slideshow = SlideShow::new(&cfg, gate);
        let frame_interval = Duration::from_secs_f64(1.0 / cfg.slideshow.frame_rate.max(1) as f64);
        let display_power = cfg.display_power.clone().map(DisplayPowerController::new);
        Self {
            cfg,
            cancel,
            control,
            source: Some(source),
            display_power,
            window: None,
            surface: None,
            surface_config: None,
            device: None,
            queue: None,
            renderer: None,
            pipeline: None,
            slideshow,
            frame_interval,
            next_frame: Instant::now(),
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let mut attrs = WindowAttributes::default().with_title(self.cfg.display.title.clone());
        if self.cfg.display.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                if self.cfg.display.fullscreen {
                    window.set_cursor_visible(false);
                }
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create viewer window");
                None
            }
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to acquire GPU adapter")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no texture formats")?;

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("viewer-device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .context("failed to acquire GPU device")?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "viewer surface configured",
        );

        let renderer = SlideRenderer::new(&device, &queue, format, size, &self.cfg);
        let target = TargetSize {
            width: config.width,
            height: config.height,
            max_texture_dimension: self
                .cfg
                .compositor
                .max_texture_dimension
                .min(renderer.max_texture_dimension()),
        };
        let source = self
            .source
            .take()
            .context("picture source already handed to a pipeline")?;
        let settings = CompositorSettings {
            options: self.cfg.compositor.clone(),
            pair_portraits: self.cfg.slideshow.pair_portraits,
            tolerance: self.cfg.compositor.mat.images.tolerance(),
            target,
        };
        let pipeline = PrefetchPipeline::spawn(source, settings)?;

        if let Some(power) = self.display_power.as_ref() {
            info!(on = power.is_on(), "display power state at startup");
        }

        self.surface = Some(surface);
        self.surface_config = Some(config);
        self.device = Some(device);
        self.queue = Some(queue);
        self.renderer = Some(renderer);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn handle_resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        let (Some(surface), Some(device), Some(config)) = (
            self.surface.as_ref(),
            self.device.as_ref(),
            self.surface_config.as_mut(),
        ) else {
            return;
        };

        config.width = new_size.width.max(1);
        config.height = new_size.height.max(1);
        surface.configure(device, config);
        debug!(
            width = config.width,
            height = config.height,
            "viewer surface resized",
        );

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.resize(new_size);
            if let Some(pipeline) = self.pipeline.as_ref() {
                pipeline.set_target(TargetSize {
                    width: config.width,
                    height: config.height,
                    max_texture_dimension: self
                        .cfg
                        .compositor
                        .max_texture_dimension
                        .min(renderer.max_texture_dimension()),
                });
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.control.try_recv() {
                Ok(command) => self.apply_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply_command(&mut self, command: ViewerCommand) {
        debug!(?command, "viewer command");
        match command {
            ViewerCommand::SetMattingTolerance(value) => match self.pipeline.as_ref() {
                Some(pipeline) => pipeline.set_matting_tolerance(value),
                None => warn!("matting tolerance change ignored before startup"),
            },
            ViewerCommand::SetDisplayPower(on) => {
                match self.display_power.as_ref() {
                    Some(power) => {
                        if let Err(err) = power.set_on(on) {
                            warn!(error = %err, on, "failed to switch display power");
                        }
                    }
                    None => warn!("display power control is not configured"),
                }
                self.slideshow.apply_command(&command, Instant::now());
            }
            other => {
                self.slideshow.apply_command(&other, Instant::now());
            }
        }
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        self.drain_commands();

        let (Some(surface), Some(device), Some(queue), Some(window)) = (
            self.surface.as_ref(),
            self.device.as_ref(),
            self.queue.as_ref(),
            self.window.as_ref(),
        ) else {
            return;
        };
        let window = window.clone();

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("viewer surface lost; reconfiguring");
                self.handle_resize(window.inner_size());
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("viewer surface out of memory; exiting event loop");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("viewer surface acquisition timed out");
                return;
            }
            Err(SurfaceError::Other) => {
                warn!("viewer surface reported an unknown error; retrying");
                self.handle_resize(window.inner_size());
                return;
            }
        };

        let (Some(pipeline), Some(renderer)) = (self.pipeline.as_mut(), self.renderer.as_mut())
        else {
            return;
        };
        let status = self.slideshow.frame(Instant::now(), pipeline, renderer);
        if !status.keep_running {
            info!("slideshow finished; exiting event loop");
            event_loop.exit();
            return;
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("viewer-encoder"),
        });
        renderer.encode(&mut encoder, &view);
        queue.submit(std::iter::once(encoder.finish()));
        window.pre_present_notify();
        frame.present();
    }

    fn shutdown_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            info!("stopping prefetch pipeline");
            pipeline.shutdown();
        }
    }
}

impl<S: PictureSource + 'static> ApplicationHandler<ViewerEvent> for ViewerApp<S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }

        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.device.is_none() {
            if let Err(err) = self.init_gpu(window.clone()) {
                error!(error = ?err, "failed to initialize GPU state");
                event_loop.exit();
                return;
            }
        }

        window.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("viewer window close requested");
                self.slideshow.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let size = window.inner_size();
                let _ = inner_size_writer.request_inner_size(size);
                self.handle_resize(size);
            }
            WindowEvent::RedrawRequested => {
                self.draw(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_frame {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
            self.next_frame = now + self.frame_interval;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame));
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                self.slideshow.stop();
                event_loop.exit();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown_pipeline();
    }
}

/// Opens the window and runs the slideshow until cancelled or closed.
pub fn run_windowed<S>(
    source: S,
    gate: TransitionGate,
    cancel: CancellationToken,
    cfg: Configuration,
    control: CommandReceiver,
) -> Result<()>
where
    S: PictureSource + 'static,
{
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };

    let mut app = ViewerApp::new(cfg, cancel, source, gate, control);
    let run_result = event_loop.run_app(&mut app);
    app.shutdown_pipeline();
    cancel_task.abort();

    run_result.context("viewer event loop failed")
}
