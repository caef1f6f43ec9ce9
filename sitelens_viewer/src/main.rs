mod cli;
mod headless;
mod input;
mod renderer;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use pollster::FutureExt;
use sitelens_engine::{FramePacer, ViewerController};
use sitelens_formats::load_element_records;
use wgpu::SurfaceError;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use cli::Args;
use input::{InputState, key_action};
use renderer::Renderer;

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();

    let config = cli::resolve_config(&args)?;
    let records = match args.elements.as_deref() {
        Some(path) => load_element_records(path)?,
        None => Vec::new(),
    };

    let mut controller = ViewerController::new(config);
    let status = controller.load(args.model.as_deref(), records);
    if let Some(reason) = status.error() {
        eprintln!("[sitelens_viewer] model load failed: {reason}");
    }

    if args.headless {
        return headless::run(&args, &mut controller);
    }

    run_window(&args, controller)
}

fn run_window(args: &Args, mut controller: ViewerController) -> Result<()> {
    let event_loop = EventLoop::new().context("creating winit event loop")?;
    let title = match args.model.as_deref() {
        Some(model) => format!("SiteLens Viewer - {model}"),
        None => String::from("SiteLens Viewer"),
    };
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)
            .context("creating viewer window")?,
    );

    let mut renderer = Renderer::new(window).block_on()?;
    let size = renderer.size();
    controller.set_viewport(size.width, size.height);
    let mut input = InputState::new(size.width, size.height);
    let mut pacer = FramePacer::new(controller.config().target_fps);

    event_loop
        .run(move |event, target| match event {
            Event::WindowEvent { window_id, event } if window_id == renderer.window().id() => {
                match event {
                    WindowEvent::CloseRequested => target.exit(),
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                logical_key,
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => {
                        if let Some(action) = key_action(&logical_key) {
                            if !input::apply(&mut controller, action) {
                                target.exit();
                            }
                        }
                    }
                    WindowEvent::CursorMoved { position, .. } => {
                        for action in input.cursor_moved(position.x, position.y) {
                            input::apply(&mut controller, action);
                        }
                    }
                    WindowEvent::MouseInput { state, button, .. } => {
                        let pressed = state == ElementState::Pressed;
                        if let Some(action) = input.mouse_button(button, pressed) {
                            input::apply(&mut controller, action);
                        }
                    }
                    WindowEvent::MouseWheel { delta, .. } => {
                        let action = match delta {
                            MouseScrollDelta::LineDelta(_, lines) => input.wheel_lines(lines),
                            MouseScrollDelta::PixelDelta(offset) => input.wheel_pixels(offset.y),
                        };
                        input::apply(&mut controller, action);
                    }
                    WindowEvent::Focused(false) => {
                        if let Some(action) = input.release_all() {
                            input::apply(&mut controller, action);
                        }
                    }
                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        input.resize(new_size.width, new_size.height);
                        controller.set_viewport(new_size.width, new_size.height);
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = pacer.delta_since_last(now);
                        if !pacer.should_render(now) {
                            return;
                        }
                        renderer.sync_scene(controller.scene());
                        let update = controller.frame(dt, Some(renderer.picker_mut()));
                        renderer.apply_update(controller.scene(), &update);
                        for event in controller.drain_events() {
                            match serde_json::to_string(&event) {
                                Ok(line) => println!("{line}"),
                                Err(err) => log::warn!("[sitelens_viewer] event encode failed: {err}"),
                            }
                        }
                        match renderer.render(controller.view_projection(), controller.drag_rect()) {
                            Ok(()) => {}
                            Err(SurfaceError::Lost) => renderer.resize(renderer.size()),
                            Err(SurfaceError::OutOfMemory) => target.exit(),
                            Err(err) => log::warn!("[sitelens_viewer] render error: {err:?}"),
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => match pacer.next_deadline() {
                Some(deadline) if deadline > Instant::now() => {
                    target.set_control_flow(ControlFlow::WaitUntil(deadline));
                }
                _ => {
                    target.set_control_flow(ControlFlow::Poll);
                    renderer.window().request_redraw();
                }
            },
            _ => {}
        })
        .context("running viewer application")?;
    Ok(())
}
