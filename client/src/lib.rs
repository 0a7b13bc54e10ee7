//! Block map editor: paint Minecraft-scale blocks over raster and vector map tiles.
//!
//! The engine lives in [`map`]; [`app`] and the private `state` module are the
//! winit/wgpu/egui shell around it.

pub mod app;
pub mod config;
pub mod map;
mod state;

use winit::event_loop::EventLoop;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Install the platform log backend. `RUST_LOG` overrides the default `info` filter natively.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
    #[cfg(target_arch = "wasm32")]
    {
        console_error_panic_hook::set_once();
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            web_sys::console::error_1(&format!("logger: {}", e).into());
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    init_logging();

    #[cfg(not(target_arch = "wasm32"))]
    {
        let event_loop = EventLoop::with_user_event().build()?;
        let mut app = app::App::new();
        event_loop.run_app(&mut app)?;
    }

    #[cfg(target_arch = "wasm32")]
    {
        use winit::platform::web::EventLoopExtWebSys;

        let event_loop = EventLoop::with_user_event().build()?;
        let app = app::App::new(&event_loop);
        event_loop.spawn_app(app);
    }

    Ok(())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn run_web() -> Result<(), JsValue> {
    run().map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}
