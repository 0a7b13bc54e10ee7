mod input;
mod presenter;

use std::rc::Rc;
use std::sync::Arc;

use egui::{Align2, Context, FontId, FullOutput, Id, LayerId, Order, Pos2, SidePanel, TopBottomPanel};
use egui_wgpu::{Renderer, RendererOptions, ScreenDescriptor};
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use log::{error, warn};
use wgpu::{Backends, ExperimentalFeatures, Features, Instance, InstanceDescriptor, MemoryHints, SurfaceError, Trace};
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::config::{EditorConfig, ProjectState};
use crate::map::blocks::PALETTE;
use crate::map::canvas::{Label, PixelCanvas};
use crate::map::loader::{HttpFetcher, TileFetcher};
use crate::map::task::{FrameClock, TaskQueue, YieldPolicy};
use crate::map::view::{MapView, Transition};

use input::MapInput;
use presenter::CanvasPresenter;

/// Window, GPU resources, UI and the map view it presents
pub struct State {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub is_surface_configured: bool,
    resize_request: Option<PhysicalSize<u32>>,
    ui_renderer: Renderer,
    egui_ctx: Context,
    egui_state: egui_winit::State,
    egui_output: Option<FullOutput>,
    presenter: CanvasPresenter,
    view: MapView<PixelCanvas>,
    pool: LocalPool,
    frame_clock: FrameClock,
    input: MapInput,
    editor: EditorConfig,
    offset_form: (i64, i64, i64),
    needs_draw: bool,
}

impl State {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let surface: wgpu::Surface<'_> = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Main Device"),
                required_features: Features::empty(),
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                experimental_features: ExperimentalFeatures::disabled(),
                memory_hints: MemoryHints::Performance,
                trace: Trace::Off,
            })
            .await?;

        let cap: wgpu::SurfaceCapabilities = surface.get_capabilities(&adapter);

        let texture_format = cap
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(cap.formats[0]);

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: texture_format,
            width: size.width,
            height: size.height,
            present_mode: cap.present_modes[0],
            alpha_mode: cap.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let ui_renderer = Renderer::new(
            &device,
            texture_format,
            RendererOptions {
                msaa_samples: 0,
                depth_stencil_format: None,
                dithering: false,
                predictable_texture_filtering: false,
            },
        );
        let egui_ctx = Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            window.as_ref(),
            egui_ctx.native_pixels_per_point(),
            window.theme(),
            None,
        );

        let presenter = CanvasPresenter::new(&device, texture_format);

        let mut editor = EditorConfig::load()?;
        let pool = LocalPool::new();
        let frame_clock = FrameClock::new();
        let view = MapView::new(
            PixelCanvas::new(size.width, size.height),
            TaskQueue::new(pool.spawner(), editor.max_concurrency),
            editor.view.clone(),
        )
        .with_yield_policy(YieldPolicy::Frame(frame_clock.clone()));

        #[cfg(not(target_arch = "wasm32"))]
        let fetcher: Rc<dyn TileFetcher> = Rc::new(HttpFetcher::new(
            &editor.user_agent,
            std::time::Duration::from_secs(editor.fetch_timeout_secs),
            editor.max_concurrency,
        )?);
        #[cfg(target_arch = "wasm32")]
        let fetcher: Rc<dyn TileFetcher> = Rc::new(HttpFetcher::new(&editor.user_agent));

        for source in editor.build_sources(fetcher) {
            view.add_source(source);
        }
        let mut initial = view.state();
        initial.layers = editor.layers.clone();
        initial.projection = editor.projection();
        view.apply(Transition {
            state: initial,
            redraw: true,
        });

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(path) = editor.project_path.clone() {
            match ProjectState::load(&path) {
                Ok(Some(project)) => project.restore(&view, &mut editor),
                Ok(None) => {}
                Err(e) => warn!("Ignoring project {}: {:#}", path, e),
            }
        }

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
            resize_request: None,
            ui_renderer,
            egui_ctx,
            egui_state,
            egui_output: None,
            presenter,
            view,
            pool,
            frame_clock,
            input: MapInput::new(),
            editor,
            offset_form: (0, 64, 0),
            needs_draw: true,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            if !self.is_surface_configured {
                self.apply_size(width, height);
                self.is_surface_configured = true;
            } else {
                self.resize_request = Some(PhysicalSize::new(width, height));
            }
        }
    }

    fn apply_size(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.view.surface().borrow_mut().resize(width, height);
        self.view.resize(width as f32, height as f32);
        self.needs_draw = true;
    }

    /// Feeds the UI, then the map gestures. Returns whether the UI consumed the event.
    pub fn handle_input(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(self.window.as_ref(), event);
        if response.consumed {
            return true;
        }
        if self.input.handle(&self.view, event) {
            self.needs_draw = true;
        }
        false
    }

    pub fn save_project(&self) {
        #[cfg(not(target_arch = "wasm32"))]
        if let Some(path) = &self.editor.project_path {
            if let Err(e) = ProjectState::capture(&self.view, &self.editor).save(path) {
                error!("Failed to save project: {:#}", e);
            }
        }
    }

    /// Abandon the draw in flight and stop its tile tasks without waiting on the network
    pub fn shutdown(&mut self) {
        let view = self.view.clone();
        if let Err(e) = self.pool.spawner().spawn_local(async move { view.cancel().await }) {
            warn!("Failed to cancel tile work: {}", e);
        }
        self.pool.run_until_stalled();
    }

    fn spawn_draw(&mut self) {
        let view = self.view.clone();
        let spawned = self.pool.spawner().spawn_local(async move {
            view.draw().await;
        });
        if let Err(e) = spawned {
            warn!("Failed to schedule redraw: {}", e);
        }
    }

    /// Advance tile work by one frame and build the UI
    pub fn update(&mut self) {
        self.frame_clock.advance();
        if std::mem::take(&mut self.needs_draw) {
            self.spawn_draw();
        }
        self.pool.run_until_stalled();

        {
            let mut canvas = self.view.surface().borrow_mut();
            if canvas.take_dirty() {
                self.presenter.upload(&self.device, &self.queue, canvas.image());
            }
        }

        let input = self.egui_state.take_egui_input(self.window.as_ref());
        let view = &self.view;
        let labels: Vec<Label> = view.surface().borrow().labels().to_vec();
        let mut redraw = false;
        let offset_form = &mut self.offset_form;
        let output = self.egui_ctx.run(input, |ctx| {
            TopBottomPanel::bottom("status").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.monospace(view.status());
                    ui.separator();
                    let tasks = view.tasks().stats();
                    ui.label(format!("tasks {}/{} queued {}", tasks.running, tasks.max_concurrency, tasks.queued));
                });
            });

            SidePanel::right("tools").show(ctx, |ui| {
                ui.heading("Sources");
                for source in view.sources() {
                    let mut enabled = source.is_enabled();
                    let stats = source.cache_stats();
                    let text = format!(
                        "{} ({} cached, {:.0}% of memory)",
                        source.name(),
                        stats.tile_count,
                        stats.memory_usage_percent()
                    );
                    if ui.checkbox(&mut enabled, text).changed() {
                        redraw |= view.set_source_enabled(source.name(), enabled);
                    }
                }

                ui.heading("Layers");
                let style = view.state().layers;
                for name in style.block_colors.keys() {
                    let mut visible = style.is_visible(name);
                    if ui.checkbox(&mut visible, name.as_str()).changed() {
                        redraw |= view.toggle_layer(name);
                    }
                }

                ui.heading("Blocks");
                ui.horizontal_wrapped(|ui| {
                    let current = view.current_color();
                    if ui.selectable_label(current.is_none(), "eraser").clicked() {
                        view.set_current_color(None);
                    }
                    for (label, _) in PALETTE {
                        if ui.selectable_label(current == Some(label), label.to_string()).clicked() {
                            view.set_current_color(Some(label));
                        }
                    }
                });

                ui.heading("Minecraft offset");
                ui.horizontal(|ui| {
                    ui.add(egui::DragValue::new(&mut offset_form.0).prefix("x "));
                    ui.add(egui::DragValue::new(&mut offset_form.1).prefix("y "));
                    ui.add(egui::DragValue::new(&mut offset_form.2).prefix("z "));
                });
                if ui.button("Set for selected block").clicked() {
                    let (x, y, z) = *offset_form;
                    redraw |= view.set_minecraft_offset(x, y, z);
                }
            });

            let ppp = ctx.pixels_per_point();
            let painter = ctx.layer_painter(LayerId::new(Order::Background, Id::new("map-labels")));
            for label in &labels {
                let [r, g, b, a] = [label.color.r, label.color.g, label.color.b, label.color.a];
                painter.text(
                    Pos2::new(label.x / ppp, label.y / ppp),
                    if label.centered {
                        Align2::CENTER_CENTER
                    } else {
                        Align2::LEFT_BOTTOM
                    },
                    &label.text,
                    FontId::monospace(11.0),
                    egui::Color32::from_rgba_unmultiplied(r, g, b, a),
                );
            }
        });
        self.needs_draw |= redraw;
        self.egui_output = Some(output);
    }

    pub fn render(&mut self) -> Result<(), SurfaceError> {
        self.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        if let Some(PhysicalSize { width, height }) = self.resize_request.take() {
            self.apply_size(width, height)
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(_) => {
                self.surface.configure(&self.device, &self.config);
                self.surface.get_current_texture()?
            }
        };

        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        let mut ui_frame = None;
        if let Some(output) = self.egui_output.take() {
            let FullOutput {
                platform_output,
                textures_delta,
                shapes,
                pixels_per_point,
                viewport_output,
            } = output;

            for _ in viewport_output {
                warn!("Viewport change is not handled!")
            }

            self.egui_state
                .handle_platform_output(self.window.as_ref(), platform_output);

            for (id, delta) in &textures_delta.set {
                self.ui_renderer.update_texture(&self.device, &self.queue, *id, delta);
            }
            let descriptor = ScreenDescriptor {
                size_in_pixels: [self.config.width, self.config.height],
                pixels_per_point,
            };
            let primitives = self.egui_ctx.tessellate(shapes, pixels_per_point);
            self.ui_renderer
                .update_buffers(&self.device, &self.queue, &mut encoder, &primitives, &descriptor);
            ui_frame = Some((primitives, descriptor, textures_delta.free));
        }

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: 0.83,
                                g: 0.83,
                                b: 0.83,
                                a: 1.0,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                })
                .forget_lifetime();

            self.presenter.render(&mut render_pass);

            if let Some((primitives, descriptor, _)) = &ui_frame {
                self.ui_renderer.render(&mut render_pass, primitives, descriptor);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        if let Some((_, _, free)) = ui_frame {
            for id in free {
                self.ui_renderer.free_texture(&id)
            }
        }

        Ok(())
    }
}
