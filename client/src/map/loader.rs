//! Tile byte fetching with platform-specific implementations

use futures::future::{FutureExt, LocalBoxFuture};

use super::error::TileError;

/// Source of raw tile payloads.
///
/// The returned future must settle eventually (success, error, or timeout) so
/// the task holding it frees its queue slot.
pub trait TileFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, TileError>>;
}

// Native implementation: blocking reqwest on a pool of worker threads
#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::channel::oneshot;
    use log::{debug, warn};

    use super::*;

    struct FetchRequest {
        url: String,
        reply: oneshot::Sender<Result<Vec<u8>, TileError>>,
    }

    /// HTTP fetcher; responses cross back to the UI thread through oneshots
    pub struct HttpFetcher {
        request_tx: mpsc::Sender<FetchRequest>,
        _workers: Vec<std::thread::JoinHandle<()>>,
    }

    impl HttpFetcher {
        pub fn new(user_agent: &str, timeout: Duration, workers: usize) -> anyhow::Result<Self> {
            let client = reqwest::blocking::Client::builder()
                .user_agent(user_agent)
                .timeout(timeout)
                .build()?;

            let (request_tx, request_rx) = mpsc::channel::<FetchRequest>();
            let request_rx = Arc::new(Mutex::new(request_rx));

            let mut handles = Vec::with_capacity(workers.max(1));
            for i in 0..workers.max(1) {
                let client = client.clone();
                let request_rx = request_rx.clone();
                handles.push(
                    std::thread::Builder::new()
                        .name(format!("tile-fetch-{}", i))
                        .spawn(move || Self::worker_thread(client, request_rx))?,
                );
            }

            Ok(Self {
                request_tx,
                _workers: handles,
            })
        }

        fn worker_thread(
            client: reqwest::blocking::Client,
            request_rx: Arc<Mutex<mpsc::Receiver<FetchRequest>>>,
        ) {
            loop {
                let request = match request_rx.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };
                let Ok(request) = request else {
                    break; // Sender dropped, exit thread
                };

                let result = match client.get(&request.url).send() {
                    Ok(response) => {
                        if response.status().is_success() {
                            response
                                .bytes()
                                .map(|b| b.to_vec())
                                .map_err(|e| TileError::Request(e.to_string()))
                        } else {
                            Err(TileError::Status(response.status().as_u16()))
                        }
                    }
                    Err(e) => Err(TileError::Request(e.to_string())),
                };

                match &result {
                    Ok(bytes) => debug!("Fetched {} ({} bytes)", request.url, bytes.len()),
                    Err(e) => warn!("Fetch {} failed: {}", request.url, e),
                }

                // The waiting task may have been dropped; nothing to do then
                let _ = request.reply.send(result);
            }
        }
    }

    impl TileFetcher for HttpFetcher {
        fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, TileError>> {
            let (reply, rx) = oneshot::channel();
            let request = FetchRequest {
                url: url.to_string(),
                reply,
            };
            if self.request_tx.send(request).is_err() {
                return futures::future::ready(Err(TileError::WorkerGone)).boxed_local();
            }
            async move { rx.await.map_err(|_| TileError::WorkerGone)? }.boxed_local()
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::HttpFetcher;

// WASM implementation using web-sys fetch API
#[cfg(target_arch = "wasm32")]
pub struct HttpFetcher {
    user_agent: String,
}

#[cfg(target_arch = "wasm32")]
impl HttpFetcher {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, TileError>> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;
        use web_sys::{Request, RequestInit, RequestMode, Response};

        let url = url.to_string();
        let user_agent = self.user_agent.clone();

        async move {
            let opts = RequestInit::new();
            opts.set_method("GET");
            opts.set_mode(RequestMode::Cors);

            let web_request = Request::new_with_str_and_init(&url, &opts)
                .map_err(|e| TileError::Request(format!("Failed to create request: {:?}", e)))?;

            // Browsers may silently drop this header
            web_request
                .headers()
                .set("User-Agent", &user_agent)
                .map_err(|e| TileError::Request(format!("Failed to set User-Agent: {:?}", e)))?;

            let window =
                web_sys::window().ok_or_else(|| TileError::Request("No window object".into()))?;
            let resp_value = JsFuture::from(window.fetch_with_request(&web_request))
                .await
                .map_err(|e| TileError::Request(format!("Fetch failed: {:?}", e)))?;

            let resp: Response = resp_value
                .dyn_into()
                .map_err(|_| TileError::Request("Response is not a Response object".into()))?;

            if !resp.ok() {
                return Err(TileError::Status(resp.status()));
            }

            let array_buffer = JsFuture::from(
                resp.array_buffer()
                    .map_err(|e| TileError::Request(format!("Failed to get array buffer: {:?}", e)))?,
            )
            .await
            .map_err(|e| TileError::Request(format!("Failed to read array buffer: {:?}", e)))?;

            Ok(js_sys::Uint8Array::new(&array_buffer).to_vec())
        }
        .boxed_local()
    }
}

/// Decode raster tile bytes (PNG/JPEG) to RGBA
pub fn decode_tile_image(data: &[u8]) -> Result<image::RgbaImage, TileError> {
    let img = image::load_from_memory(data)?;
    Ok(img.to_rgba8())
}

/// Memory size of a decoded RGBA tile
pub fn tile_memory_size(width: u32, height: u32) -> usize {
    (width * height * 4) as usize // RGBA8 = 4 bytes per pixel
}
