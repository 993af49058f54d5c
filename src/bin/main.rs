#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate quad;

    use std::sync::Arc;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use quad::config;
    use quad::core::db::{self, MemoryStore};
    use quad::state::AppState;

    mod adapter {
        use spin_sdk::http::{Method, Request, Response};

        /// The parts of an actix request that cross into the blocking pool.
        pub struct OwnedRequest {
            pub method: String,
            pub uri: String,
            pub headers: Vec<(String, String)>,
            pub body: Vec<u8>,
        }

        impl OwnedRequest {
            pub fn from_actix(req: &actix_web::HttpRequest, body: actix_web::web::Bytes) -> Self {
                let headers = req
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                Self {
                    method: req.method().as_str().to_string(),
                    uri: req.uri().to_string(),
                    headers,
                    body: body.to_vec(),
                }
            }

            pub fn into_spin(self) -> Request {
                let method = match self.method.as_str() {
                    "GET" => Method::Get,
                    "POST" => Method::Post,
                    "PUT" => Method::Put,
                    "DELETE" => Method::Delete,
                    "HEAD" => Method::Head,
                    "OPTIONS" => Method::Options,
                    "PATCH" => Method::Patch,
                    other => Method::Other(other.to_string()),
                };

                let mut builder = Request::builder();
                builder.method(method).uri(self.uri.as_str());
                for (name, value) in &self.headers {
                    builder.header(name.as_str(), value.as_str());
                }
                builder.body(self.body).build()
            }
        }

        pub struct OwnedResponse {
            pub status: u16,
            pub headers: Vec<(String, String)>,
            pub body: Vec<u8>,
        }

        impl OwnedResponse {
            pub fn from_spin(resp: &Response) -> Self {
                let headers = resp
                    .headers()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|v| (name.to_string(), v.to_string()))
                    })
                    .collect();
                Self {
                    status: *resp.status(),
                    headers,
                    body: resp.body().to_vec(),
                }
            }

            pub fn into_actix(self) -> actix_web::HttpResponse {
                let mut response = actix_web::HttpResponse::build(
                    actix_web::http::StatusCode::from_u16(self.status)
                        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
                );
                for (name, value) in self.headers {
                    response.insert_header((name, value));
                }
                response.body(self.body)
            }
        }
    }

    /// Builds the state outside the async runtime: the blocking tag
    /// suggester client must not be created or dropped on a reactor thread.
    pub fn run() -> anyhow::Result<()> {
        quad::telemetry::init_tracing();

        let store = Arc::new(MemoryStore::new());
        if config::seed_demo_data() {
            db::seed_demo_data(&*store)?;
        }
        let state = web::Data::new(AppState::from_env(store)?);

        actix_web::rt::System::new().block_on(serve(state.clone()))?;
        Ok(())
    }

    async fn serve(state: web::Data<AppState>) -> std::io::Result<()> {
        let addr = config::bind_address();
        tracing::info!(%addr, "server listening");

        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(web::PayloadConfig::new(config::MAX_IMAGE_BYTES + 1024))
                .default_service(web::route().to(handle_all))
        })
        .bind(addr)?
        .run()
        .await
    }

    async fn handle_all(
        state: web::Data<AppState>,
        req: HttpRequest,
        body: web::Bytes,
    ) -> HttpResponse {
        let owned = adapter::OwnedRequest::from_actix(&req, body);
        let state = state.into_inner();

        // Storage and the tag suggester block, so routing runs off the reactor.
        let result = web::block(move || {
            let spin_req = owned.into_spin();
            let resp = quad::handlers::route(&state, &spin_req);
            adapter::OwnedResponse::from_spin(&resp)
        })
        .await;

        match result {
            Ok(resp) => resp.into_actix(),
            Err(err) => {
                tracing::error!(error = %err, "request worker failed");
                HttpResponse::InternalServerError()
                    .json(serde_json::json!({"error": "Internal server error"}))
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::run()
}

#[cfg(target_arch = "wasm32")]
fn main() {}
