#![cfg(feature = "play")]
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use egui::{Color32, RichText};
use egui_wgpu::{Renderer as EguiRenderer, ScreenDescriptor};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event as WinitEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use crate::frame_driver::{FrameDriver, RealtimeClock};
use crate::look::{default_look_with_overrides, load_look_with_overrides};
use crate::offset::PanState;
use crate::renderer::{GpuContext, GpuRenderer};
use crate::schema::{EffectParameters, Look, ParamOverride};
use crate::source::MediaSource;

/// Longest window side when the frame preset is larger than the screen.
const MAX_WINDOW_SIDE: u32 = 960;
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

pub fn run_play(
    input_path: &Path,
    look_path: Option<&Path>,
    overrides: &[ParamOverride],
) -> Result<()> {
    let look_path = look_path.map(canonical_path);
    let look = match &look_path {
        Some(path) => load_look_with_overrides(path, overrides)?,
        None => default_look_with_overrides(overrides)?,
    };
    let (frame_width, frame_height) = look.frame.dimensions_px()?;
    let source = MediaSource::open(input_path)?;

    let event_loop = EventLoop::new().context("failed to create play event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(format!("crossflute - {}", input_path.display()))
            .with_inner_size(window_size_for(frame_width, frame_height))
            .with_resizable(false)
            .build(&event_loop)
            .context("failed to create preview window")?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance
        .create_surface(window.clone())
        .context("failed to create wgpu surface")?;
    let gpu_context = pollster::block_on(GpuContext::for_surface(instance, &surface))
        .context("failed to initialize WGPU context for the preview window")?;

    let caps = surface.get_capabilities(&gpu_context.adapter);
    let format = pick_surface_format(&caps.formats)?;
    let mut renderer = GpuRenderer::new(&gpu_context, format)?;
    let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        wgpu::PresentMode::Mailbox
    } else {
        wgpu::PresentMode::Fifo
    };
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);

    let initial_size = window.inner_size();
    let mut surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: initial_size.width.max(1),
        height: initial_size.height.max(1),
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&gpu_context.device, &surface_config);

    // The surface is the output frame: its aspect drives cover-fit and drags.
    let mut driver = FrameDriver::new(surface_config.width, surface_config.height, look.params)?;
    driver.set_pan(PanState::new(look.pan));
    driver.bind_source(source)?;

    let (watch_tx, watch_rx) = mpsc::channel::<()>();
    let _watcher = match &look_path {
        Some(path) => Some(watch_look(path, watch_tx)?),
        None => None,
    };

    let egui_ctx = egui::Context::default();
    let viewport_id = egui::ViewportId::ROOT;
    let mut egui_state =
        egui_winit::State::new(egui_ctx.clone(), viewport_id, &event_loop, None, None);
    let mut egui_renderer = EguiRenderer::new(&gpu_context.device, surface_config.format, None, 1);

    eprintln!(
        "[crossflute] play: {} on a {}x{} surface ({} via {})",
        input_path.display(),
        surface_config.width,
        surface_config.height,
        renderer_label(format),
        gpu_context.adapter_name()
    );
    eprintln!("[crossflute] Controls: drag to pan, Space pause, R reset all, H hide panel, Esc quit");

    let mut ui = UiState::default();
    let mut clock = RealtimeClock::new();
    let mut next_redraw_at = Instant::now();
    let overrides = overrides.to_vec();

    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Wait);

            match event {
                WinitEvent::WindowEvent { window_id, event } if window_id == window.id() => {
                    let egui_response = egui_state.on_window_event(&window, &event);
                    if egui_response.repaint {
                        window.request_redraw();
                    }
                    match event {
                        WindowEvent::CloseRequested => target.exit(),
                        WindowEvent::KeyboardInput { event, .. } => {
                            if event.state == ElementState::Pressed
                                && !event.repeat
                                && !egui_response.consumed
                            {
                                match event.physical_key {
                                    PhysicalKey::Code(KeyCode::Space) => clock.toggle_pause(),
                                    PhysicalKey::Code(KeyCode::KeyR) => driver.reset(),
                                    PhysicalKey::Code(KeyCode::KeyH) => {
                                        ui.show_panel = !ui.show_panel
                                    }
                                    PhysicalKey::Code(KeyCode::Escape) => target.exit(),
                                    _ => {}
                                }
                                window.request_redraw();
                            }
                        }
                        WindowEvent::MouseInput {
                            state,
                            button: MouseButton::Left,
                            ..
                        } => {
                            ui.dragging = state == ElementState::Pressed
                                && !egui_ctx.wants_pointer_input();
                        }
                        WindowEvent::CursorMoved { position, .. } => {
                            if let (true, Some(last)) = (ui.dragging, ui.last_cursor) {
                                let (dx, dy) =
                                    surface_drag_delta(last, position, surface_config.height);
                                driver.drag(dx, dy);
                                window.request_redraw();
                            }
                            ui.last_cursor = Some(position);
                        }
                        WindowEvent::CursorLeft { .. } => {
                            ui.dragging = false;
                            ui.last_cursor = None;
                        }
                        WindowEvent::RedrawRequested => {
                            render_frame(
                                &window,
                                &surface,
                                &gpu_context,
                                &mut surface_config,
                                &mut renderer,
                                &mut driver,
                                &mut clock,
                                &egui_ctx,
                                &mut egui_state,
                                &mut egui_renderer,
                                &mut ui,
                            );
                        }
                        WindowEvent::Resized(size) => {
                            if size.width > 0 && size.height > 0 {
                                surface_config.width = size.width;
                                surface_config.height = size.height;
                                surface.configure(&gpu_context.device, &surface_config);
                                if let Err(error) = driver.resize_frame(size.width, size.height) {
                                    eprintln!("[crossflute] play: resize failed: {error:#}");
                                }
                            }
                        }
                        _ => {}
                    }
                }
                WinitEvent::AboutToWait => {
                    let mut look_dirty = false;
                    while watch_rx.try_recv().is_ok() {
                        look_dirty = true;
                    }
                    if let (true, Some(path)) = (look_dirty, &look_path) {
                        try_hot_reload(path, &overrides, &window, &mut driver);
                        window.request_redraw();
                    }

                    // The effect is a function of wall-clock time, so keep
                    // redrawing while it or a video source can change.
                    let now = Instant::now();
                    if now >= next_redraw_at {
                        window.request_redraw();
                        next_redraw_at = now + FRAME_INTERVAL;
                    }
                    target.set_control_flow(ControlFlow::WaitUntil(next_redraw_at));
                }
                _ => {}
            }
        })
        .map_err(|error| anyhow!("play event loop terminated: {error}"))
}

#[derive(Debug)]
struct UiState {
    show_panel: bool,
    dragging: bool,
    last_cursor: Option<PhysicalPosition<f64>>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            show_panel: true,
            dragging: false,
            last_cursor: None,
        }
    }
}

/// Pointer motion in surface units: pixels over surface height, y up. With
/// this scaling a drag across the full width pans by one picture width.
fn surface_drag_delta(
    from: PhysicalPosition<f64>,
    to: PhysicalPosition<f64>,
    surface_height: u32,
) -> (f32, f32) {
    let height = f64::from(surface_height.max(1));
    (
        ((to.x - from.x) / height) as f32,
        ((from.y - to.y) / height) as f32,
    )
}

fn render_frame(
    window: &winit::window::Window,
    surface: &wgpu::Surface<'_>,
    gpu_context: &GpuContext,
    surface_config: &mut wgpu::SurfaceConfiguration,
    renderer: &mut GpuRenderer,
    driver: &mut FrameDriver<MediaSource>,
    clock: &mut RealtimeClock,
    egui_ctx: &egui::Context,
    egui_state: &mut egui_winit::State,
    egui_renderer: &mut EguiRenderer,
    ui: &mut UiState,
) {
    if surface_config.width == 0 || surface_config.height == 0 {
        return;
    }

    let frame = match surface.get_current_texture() {
        Ok(frame) => frame,
        Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
            surface.configure(&gpu_context.device, surface_config);
            return;
        }
        Err(wgpu::SurfaceError::Timeout) => {
            return;
        }
        Err(wgpu::SurfaceError::OutOfMemory) => {
            eprintln!("[crossflute] play: surface out of memory");
            return;
        }
    };

    let view = frame
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let elapsed = clock.elapsed_seconds();
    let drawn = driver.tick(elapsed).and_then(|plan| {
        let (Some(plan), Some(source)) = (plan, driver.source()) else {
            return Ok(());
        };
        renderer.render_to_view(source, &plan.inputs, &view, surface_config.width, surface_config.height)
    });
    if let Err(error) = drawn {
        eprintln!("[crossflute] play: render error: {error:#}");
        frame.present();
        return;
    }

    let raw_input = egui_state.take_egui_input(window);
    let mut edited = *driver.params();
    let mut reset_requested = false;
    let paused = !clock.is_running();
    let full_output = egui_ctx.run(raw_input, |ctx| {
        if ui.show_panel {
            draw_controls(ctx, &mut edited, &mut reset_requested);
        }
        draw_clock(ctx, elapsed, paused);
    });

    if reset_requested {
        driver.reset();
    } else if edited != *driver.params() {
        if let Err(error) = driver.set_params(edited) {
            eprintln!("[crossflute] play: rejected parameters: {error:#}");
        }
    }

    egui_state.handle_platform_output(window, full_output.platform_output);
    let pixels_per_point = window.scale_factor() as f32;
    let paint_jobs = egui_ctx.tessellate(full_output.shapes, pixels_per_point);

    for (texture_id, delta) in &full_output.textures_delta.set {
        egui_renderer.update_texture(&gpu_context.device, &gpu_context.queue, *texture_id, delta);
    }

    let mut encoder = gpu_context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("crossflute-egui-overlay"),
        });

    let screen_descriptor = ScreenDescriptor {
        size_in_pixels: [surface_config.width, surface_config.height],
        pixels_per_point,
    };
    egui_renderer.update_buffers(
        &gpu_context.device,
        &gpu_context.queue,
        &mut encoder,
        &paint_jobs,
        &screen_descriptor,
    );

    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("crossflute-egui-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        egui_renderer.render(&mut pass, &paint_jobs, &screen_descriptor);
    }

    for texture_id in &full_output.textures_delta.free {
        egui_renderer.free_texture(texture_id);
    }

    gpu_context.queue.submit(Some(encoder.finish()));
    frame.present();
}

/// Slider ranges follow the original control surface.
fn draw_controls(ctx: &egui::Context, params: &mut EffectParameters, reset_requested: &mut bool) {
    egui::Window::new("Glass")
        .anchor(egui::Align2::LEFT_TOP, egui::vec2(12.0, 12.0))
        .resizable(false)
        .collapsible(true)
        .show(ctx, |ui| {
            ui.add(egui::Slider::new(&mut params.zoom, 0.5..=5.0).step_by(0.1).text("Zoom"));
            ui.checkbox(&mut params.enabled, "Enable effect");
            ui.add_enabled_ui(params.enabled, |ui| {
                ui.add(
                    egui::Slider::new(&mut params.square_size, 0.005..=0.2)
                        .step_by(0.005)
                        .text("Square size"),
                );
                ui.add(
                    egui::Slider::new(&mut params.distortion, 0.0..=0.5)
                        .step_by(0.01)
                        .text("Distortion"),
                );
                ui.add(
                    egui::Slider::new(&mut params.refraction, 0.0..=5.0)
                        .step_by(0.1)
                        .text("Refraction"),
                );
                ui.add(
                    egui::Slider::new(&mut params.magnification, 0.0..=10.0)
                        .step_by(0.05)
                        .text("Magnification"),
                );
                ui.add(
                    egui::Slider::new(&mut params.highlight, 0.0..=1.0)
                        .step_by(0.01)
                        .text("Glass highlights"),
                );
                ui.add(
                    egui::Slider::new(&mut params.bumpiness, 0.0..=1.0)
                        .step_by(0.01)
                        .text("Glass texture"),
                );
                ui.add(
                    egui::Slider::new(&mut params.bump_strength, 0.0..=5.0)
                        .step_by(0.01)
                        .text("Texture strength"),
                );
            });

            ui.separator();
            ui.checkbox(&mut params.animate, "Motion");
            ui.add_enabled_ui(params.animate, |ui| {
                ui.add(
                    egui::Slider::new(&mut params.speed, 0.1..=5.0)
                        .step_by(0.1)
                        .text("Speed"),
                );
                ui.add(
                    egui::Slider::new(&mut params.direction, 0.0..=360.0)
                        .step_by(15.0)
                        .suffix("°")
                        .text("Direction"),
                );
            });

            ui.separator();
            if ui.button("Reset all").clicked() {
                *reset_requested = true;
            }
        });
}

fn draw_clock(ctx: &egui::Context, elapsed: f32, paused: bool) {
    egui::Area::new(egui::Id::new("crossflute-clock"))
        .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-12.0, 12.0))
        .show(ctx, |ui| {
            egui::Frame::none()
                .fill(Color32::from_black_alpha(120))
                .rounding(egui::Rounding::same(3.0))
                .inner_margin(egui::Margin::same(8.0))
                .show(ui, |ui| {
                    let text = if paused {
                        format!("t {elapsed:.2}s (paused)")
                    } else {
                        format!("t {elapsed:.2}s")
                    };
                    ui.label(
                        RichText::new(text)
                            .monospace()
                            .color(Color32::from_rgb(220, 220, 220)),
                    );
                });
        });
}

fn watch_look(look_path: &Path, watch_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let watched = look_path.to_path_buf();
    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if should_reload(&event) && event_targets_file(&event, &watched) {
                    let _ = watch_tx.send(());
                }
            }
            Err(error) => {
                eprintln!("[crossflute] play: file watcher error: {error}");
            }
        })
        .context("failed to create file watcher")?;
    let watch_root = look_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher
        .watch(&watch_root, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", watch_root.display()))?;
    Ok(watcher)
}

fn try_hot_reload(
    look_path: &Path,
    overrides: &[ParamOverride],
    window: &winit::window::Window,
    driver: &mut FrameDriver<MediaSource>,
) {
    let look: Look = match load_look_with_overrides(look_path, overrides) {
        Ok(look) => look,
        Err(error) => {
            eprintln!("[crossflute] play: reload failed: {error:#}");
            return;
        }
    };
    let (width, height) = match look.frame.dimensions_px() {
        Ok(dimensions) => dimensions,
        Err(error) => {
            eprintln!("[crossflute] play: reload failed: {error:#}");
            return;
        }
    };

    if let Err(error) = driver.apply_look(&look) {
        eprintln!("[crossflute] play: reload failed: {error:#}");
        return;
    }

    // The new surface size arrives through a Resized event.
    let (current_width, current_height) = driver.frame_size();
    if u64::from(width) * u64::from(current_height) != u64::from(height) * u64::from(current_width)
    {
        let _ = window.request_inner_size(window_size_for(width, height));
    }

    eprintln!(
        "[crossflute] play: reloaded {} ({}x{} frame, pan ({}, {}))",
        look_path.display(),
        width,
        height,
        look.pan.x,
        look.pan.y
    );
}

fn window_size_for(frame_width: u32, frame_height: u32) -> PhysicalSize<u32> {
    let longest = frame_width.max(frame_height);
    if longest <= MAX_WINDOW_SIDE {
        return PhysicalSize::new(frame_width, frame_height);
    }
    let scale = f64::from(MAX_WINDOW_SIDE) / f64::from(longest);
    PhysicalSize::new(
        ((f64::from(frame_width) * scale).round() as u32).max(1),
        ((f64::from(frame_height) * scale).round() as u32).max(1),
    )
}

fn should_reload(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
    )
}

fn event_targets_file(event: &Event, path: &Path) -> bool {
    if event.paths.is_empty() {
        return true;
    }

    event.paths.iter().any(|candidate| {
        candidate == path
            || std::fs::canonicalize(candidate)
                .map(|resolved| resolved == path)
                .unwrap_or(false)
    })
}

fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Prefer a linear (non-sRGB) surface so the preview matches exported frames,
/// which store shader output unconverted.
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no supported formats"))
}

fn renderer_label(format: wgpu::TextureFormat) -> String {
    format!("gpu, {format:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_frames_are_scaled_to_fit() {
        assert_eq!(window_size_for(1080, 608), PhysicalSize::new(960, 540));
        assert_eq!(window_size_for(864, 1080), PhysicalSize::new(768, 960));
        assert_eq!(window_size_for(640, 480), PhysicalSize::new(640, 480));
    }

    #[test]
    fn drag_delta_is_height_normalized_with_y_up() {
        let (dx, dy) = surface_drag_delta(
            PhysicalPosition::new(100.0, 100.0),
            PhysicalPosition::new(150.0, 75.0),
            500,
        );
        assert!((dx - 0.1).abs() < 1e-6);
        assert!((dy - 0.05).abs() < 1e-6);
    }

    #[test]
    fn full_width_drag_pans_one_picture_width() {
        let pan = crate::offset::SharedPan::default();
        let (dx, dy) = surface_drag_delta(
            PhysicalPosition::new(0.0, 0.0),
            PhysicalPosition::new(1600.0, 0.0),
            900,
        );
        pan.apply_drag(dx, dy, 1600.0 / 900.0);
        assert!((pan.load().manual_offset.x + 1.0).abs() < 1e-5);
    }

    #[test]
    fn prefers_linear_surface_formats() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            pick_surface_format(&formats).expect("format"),
            wgpu::TextureFormat::Bgra8Unorm
        );
        assert!(pick_surface_format(&[]).is_err());
    }
}
