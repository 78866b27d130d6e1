//! Screen-space contact shadows demo
//!
//! Run with:
//!   cargo run --example screen_space_shadows
//!   cargo run --example screen_space_shadows -- --txaa --models 300
//!
//! Controls:
//!   WASD     - Move camera
//!   QE       - Move up/down
//!   Shift    - Sprint (2x speed)
//!   Mouse    - Look around (hold right mouse button)
//!   Scroll   - Adjust speed
//!   T        - Toggle TXAA
//!   F1       - Toggle settings UI
//!   Escape   - Exit

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use screen_space_shadows::{
    scene::{CameraController, CameraInput, FreeFlyController, DEFAULT_MODEL_COUNT},
    ui, EguiOverlay, Engine, EngineConfig, FrameOutcome, GraphicsBackendConvention, WgpuBackend,
};
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowBuilder},
};

#[derive(Parser, Debug)]
#[command(about = "Deferred renderer with screen-space contact shadows")]
struct Args {
    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    width: u32,
    /// Initial window height
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Number of scattered models
    #[arg(long, default_value_t = DEFAULT_MODEL_COUNT)]
    models: usize,
    /// Seed for model placement
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Start with TXAA enabled
    #[arg(long)]
    txaa: bool,
    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,
    /// Delay of the debug slow frame in milliseconds
    #[arg(long, default_value_t = 100)]
    slow_frame_ms: u64,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            width: self.width,
            height: self.height,
            vsync: !self.no_vsync,
            convention: GraphicsBackendConvention::WGPU,
            model_count: self.models,
            seed: self.seed,
            slow_frame_delay: Duration::from_millis(self.slow_frame_ms),
            ..EngineConfig::default()
        }
    }
}

/// Application state for input handling
struct AppState {
    camera_input: CameraInput,
    controller: FreeFlyController,
    overlay: EguiOverlay,
    show_ui: bool,
    cursor_grabbed: bool,
    last_frame: Instant,
    frame_dt: f32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let config = args.engine_config();

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            return;
        }
    };
    let window = match WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .build(&event_loop)
    {
        Ok(window) => Arc::new(window),
        Err(e) => {
            eprintln!("Failed to create window: {e}");
            return;
        }
    };

    let backend = match WgpuBackend::new(Arc::clone(&window), config.vsync) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Failed to create backend: {e}");
            return;
        }
    };
    let mut engine = match Engine::new(backend, config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to create engine: {e}");
            return;
        }
    };
    engine.settings_mut().enable_txaa = args.txaa;

    let mut state = AppState {
        camera_input: CameraInput::new(),
        controller: FreeFlyController::default().with_speed(6.0),
        overlay: EguiOverlay::new(engine.backend(), &window),
        show_ui: true,
        cursor_grabbed: false,
        last_frame: Instant::now(),
        frame_dt: 0.0,
    };
    state.controller.sync_with_camera(&engine.scene().camera);

    log::info!(
        "{} models, TXAA {}",
        engine.scene().models.len(),
        if args.txaa { "on" } else { "off" }
    );

    let result = event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                let consumed = state.show_ui && state.overlay.on_window_event(&window, &event);
                match &event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        engine.resize(size.width, size.height);
                        state
                            .overlay
                            .set_surface_size((size.width, size.height), engine.dimensions());
                    }
                    WindowEvent::RedrawRequested => render_frame(&mut engine, &mut state, &window),
                    _ if !consumed => handle_window_event(&event, &mut engine, &mut state, &window, elwt),
                    _ => {}
                }
            }
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                if state.camera_input.mouse_look_active && !state.overlay.wants_pointer_input() {
                    state.camera_input.mouse_delta.x += delta.0 as f32;
                    state.camera_input.mouse_delta.y += delta.1 as f32;
                }
            }
            Event::AboutToWait => {
                let now = Instant::now();
                state.frame_dt = (now - state.last_frame).as_secs_f32();
                state.last_frame = now;

                if !state.overlay.wants_keyboard_input() {
                    state
                        .controller
                        .update(&mut engine.scene_mut().camera, &state.camera_input, state.frame_dt);
                }
                state.camera_input.reset_deltas();
                window.request_redraw();
            }
            Event::LoopExiting => {
                log::info!("Exiting after {} frames", engine.frame_state().frame_index());
            }
            _ => {}
        }
    });

    if let Err(e) = result {
        eprintln!("Event loop failed: {e}");
    }
}

fn render_frame(engine: &mut Engine<WgpuBackend>, state: &mut AppState, window: &Window) {
    let show_ui = state.show_ui;
    if show_ui {
        state.overlay.run(window, |ctx| {
            ui::settings_window(ctx, engine.settings_mut());
        });
    }

    let overlay = &mut state.overlay;
    let outcome = engine.render_frame_with_overlay(state.frame_dt, |backend, frame| {
        if show_ui {
            overlay.paint(backend, frame)
        } else {
            Ok(())
        }
    });

    match outcome {
        Ok(FrameOutcome::Rendered) => {}
        Ok(FrameOutcome::Skipped) => log::trace!("Frame skipped"),
        Err(e) => log::error!("Render error: {e}"),
    }
}

fn handle_window_event(
    event: &WindowEvent,
    engine: &mut Engine<WgpuBackend>,
    state: &mut AppState,
    window: &Window,
    elwt: &EventLoopWindowTarget<()>,
) {
    match event {
        WindowEvent::KeyboardInput { event, .. } => {
            let pressed = event.state == ElementState::Pressed;
            let PhysicalKey::Code(key) = event.physical_key else {
                return;
            };
            match key {
                KeyCode::Escape => elwt.exit(),
                KeyCode::F1 if pressed && !event.repeat => state.show_ui = !state.show_ui,
                KeyCode::KeyT if pressed && !event.repeat => {
                    let settings = engine.settings_mut();
                    settings.enable_txaa = !settings.enable_txaa;
                    log::info!("TXAA {}", if settings.enable_txaa { "on" } else { "off" });
                }
                KeyCode::KeyW => state.camera_input.forward = pressed,
                KeyCode::KeyS => state.camera_input.backward = pressed,
                KeyCode::KeyA => state.camera_input.left = pressed,
                KeyCode::KeyD => state.camera_input.right = pressed,
                KeyCode::KeyQ | KeyCode::ControlLeft => state.camera_input.down = pressed,
                KeyCode::KeyE | KeyCode::Space => state.camera_input.up = pressed,
                KeyCode::ShiftLeft | KeyCode::ShiftRight => state.camera_input.sprint = pressed,
                _ => {}
            }
        }
        WindowEvent::MouseInput {
            state: button_state,
            button: MouseButton::Right,
            ..
        } => {
            let pressed = *button_state == ElementState::Pressed;
            state.camera_input.mouse_look_active = pressed;
            if pressed != state.cursor_grabbed {
                let mode = if pressed {
                    CursorGrabMode::Confined
                } else {
                    CursorGrabMode::None
                };
                let _ = window.set_cursor_grab(mode);
                window.set_cursor_visible(!pressed);
                state.cursor_grabbed = pressed;
            }
        }
        WindowEvent::MouseWheel { delta, .. } => {
            state.camera_input.scroll_delta += match delta {
                MouseScrollDelta::LineDelta(_, y) => *y,
                MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
            };
        }
        WindowEvent::Focused(false) => {
            state.camera_input = CameraInput::new();
            if state.cursor_grabbed {
                let _ = window.set_cursor_grab(CursorGrabMode::None);
                window.set_cursor_visible(true);
                state.cursor_grabbed = false;
            }
        }
        _ => {}
    }
}
