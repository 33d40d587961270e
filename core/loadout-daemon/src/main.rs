//! Loadout daemon entrypoint.
//!
//! A small single-writer service that owns the build cache and the client
//! status state machine. UI surfaces connect over a Unix socket with
//! newline-delimited JSON requests; a long-lived `subscribe` request turns
//! the connection into a push-event stream.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use loadout_core::{
    BuildResolver, BuildResponse, BuildStore, CoreError, CoreServices, Settings, StatusTracker,
    SurfaceHandle, SyncBroadcaster,
};
use loadout_protocol::{
    parse_adapter_event, parse_bool_param, parse_mode_param, parse_resolve_params, ErrorInfo,
    Method, Request, Response, Surface, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod provider;
mod settings;

use provider::FileProvider;
use settings::FileSettingsSink;

const SOCKET_NAME: &str = "loadout.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const STORE_HEALTH_PROBE_INTERVAL_SECS: u64 = 15;

struct DaemonState {
    services: Arc<CoreServices>,
    main_surface: SurfaceHandle,
    overlay_surface: SurfaceHandle,
}

impl DaemonState {
    fn handle_for(&self, surface: Option<Surface>) -> &SurfaceHandle {
        match surface.unwrap_or(Surface::Main) {
            Surface::Main => &self.main_surface,
            Surface::Overlay => &self.overlay_surface,
        }
    }
}

fn main() {
    init_logging();

    let data_dir = match loadout_data_dir() {
        Ok(dir) => dir,
        Err(err) => {
            error!(error = %err, "Failed to resolve data directory");
            std::process::exit(1);
        }
    };

    let socket_path = data_dir.join(SOCKET_NAME);
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare socket directory");
        std::process::exit(1);
    }
    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind socket");
            std::process::exit(1);
        }
    };

    let state = match build_state(&data_dir, loadout_core::load_settings()) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon state");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Loadout daemon started");
    spawn_store_health_probe(Arc::clone(&state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
            }
        }
    }
}

fn build_state(data_dir: &Path, settings: Settings) -> Result<Arc<DaemonState>, String> {
    let store = Arc::new(
        BuildStore::new(data_dir.join("builds.db")).map_err(|err| err.to_string())?,
    );
    let provider = Arc::new(FileProvider::new(data_dir.join("builds-source")));

    let patch = provider
        .current_patch()
        .or_else(|| settings.current_patch.clone())
        .unwrap_or_else(|| {
            warn!("No patch marker or settings seed; builds will miss until one appears");
            "0.0.0".to_string()
        });
    info!(patch = %patch, "Current patch");

    let broadcaster = Arc::new(SyncBroadcaster::new());
    let tracker = Arc::new(StatusTracker::new(Arc::clone(&broadcaster)));
    let resolver = Arc::new(BuildResolver::new(
        Arc::clone(&store),
        provider,
        Arc::clone(&broadcaster),
        patch,
    ));
    let sink = Arc::new(FileSettingsSink::new(data_dir.join("settings.json")));

    let services = Arc::new(CoreServices::new(
        tracker,
        resolver,
        store,
        broadcaster,
        sink,
        settings,
    ));
    Ok(Arc::new(DaemonState {
        main_surface: SurfaceHandle::main(Arc::clone(&services)),
        overlay_surface: SurfaceHandle::overlay(Arc::clone(&services)),
        services,
    }))
}

/// Retries the storage probe while the store is degraded, so a transient
/// disk problem heals without a daemon restart.
fn spawn_store_health_probe(state: Arc<DaemonState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(STORE_HEALTH_PROBE_INTERVAL_SECS));
        if state.services.store().is_degraded() {
            state.services.store().health_check();
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("LOADOUT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn loadout_data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".loadout"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Request received");

    if matches!(request.method, Method::Subscribe) {
        stream_subscription(stream, request, state);
        return;
    }

    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: Arc<DaemonState>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let handle = state.handle_for(request.surface);

    match request.method {
        Method::GetHealth => {
            // The probe also lifts degraded mode once storage recovers.
            let store_ok = state.services.store().health_check();
            let data = serde_json::json!({
                "status": if store_ok { "ok" } else { "degraded" },
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "current_patch": state.services.resolver().current_patch(),
                "cache_entries": state.services.store().entry_count().ok(),
                "attached_surfaces": state.services.broadcaster().attached_count(),
            });
            Response::ok(request.id, data)
        }
        Method::AdapterEvent => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "event body is required")
                }
            };
            let event = match parse_adapter_event(params) {
                Ok(event) => event,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            state.services.tracker().on_adapter_event(&event);
            Response::ok(request.id, serde_json::json!({ "accepted": true }))
        }
        Method::GetStatus => {
            let context = handle.current_status();
            let overlay = state.services.overlay_state();
            Response::ok(
                request.id,
                serde_json::json!({ "context": context, "overlay": overlay }),
            )
        }
        Method::ResolveBuild => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(
                        request.id,
                        "invalid_params",
                        "game_mode_id and champion_id are required",
                    )
                }
            };
            let parsed = match parse_resolve_params(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.resolve_build(&parsed.game_mode_id, &parsed.champion_id) {
                Ok(BuildResponse::Ready(build)) => Response::ok(
                    request.id,
                    serde_json::json!({ "status": "ready", "build": build }),
                ),
                Ok(BuildResponse::Superseded) => Response::ok(
                    request.id,
                    serde_json::json!({ "status": "superseded" }),
                ),
                Err(err) => core_error(request.id, err),
            }
        }
        Method::ClearCache => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "game_mode_id is required")
                }
            };
            let mode = match parse_mode_param(params) {
                Ok(mode) => mode,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.clear_cache(&mode) {
                Ok(removed) => Response::ok(request.id, serde_json::json!({ "removed": removed })),
                Err(err) => core_error(request.id, err),
            }
        }
        Method::SetOverlayVisible => {
            toggle_overlay(request, |visible| handle.set_overlay_visible(visible), "visible")
        }
        Method::SetInteractive => {
            toggle_overlay(request, |on| handle.set_interactive(on), "interactive")
        }
        Method::CycleDisplayMode => match handle.cycle_display_mode() {
            Ok(overlay) => overlay_response(request.id, overlay),
            Err(err) => core_error(request.id, err),
        },
        // Intercepted in handle_connection; reaching here means the
        // transport was bypassed.
        Method::Subscribe => Response::error(
            request.id,
            "invalid_request",
            "subscribe is a streaming request",
        ),
    }
}

fn toggle_overlay(
    request: Request,
    apply: impl FnOnce(bool) -> loadout_core::Result<loadout_core::OverlayState>,
    field: &str,
) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => {
            return Response::error(
                request.id,
                "invalid_params",
                format!("{} is required", field),
            )
        }
    };
    let value = match parse_bool_param(params, field) {
        Ok(value) => value,
        Err(err) => return Response::error_with_info(request.id, err),
    };
    match apply(value) {
        Ok(overlay) => overlay_response(request.id, overlay),
        Err(err) => core_error(request.id, err),
    }
}

fn overlay_response(id: Option<String>, overlay: loadout_core::OverlayState) -> Response {
    match serde_json::to_value(overlay) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize overlay state: {}", err),
        ),
    }
}

fn core_error(id: Option<String>, err: CoreError) -> Response {
    Response::error(id, err.code(), err.to_string())
}

/// Turns the connection into a push-event stream: an ack response, then
/// one JSON line per event until the client goes away.
fn stream_subscription(mut stream: UnixStream, request: Request, state: Arc<DaemonState>) {
    if request.protocol_version != PROTOCOL_VERSION {
        let _ = write_response(
            &mut stream,
            Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            ),
        );
        return;
    }

    let handle = state.handle_for(request.surface);
    let subscription = handle.subscribe();
    let ack = Response::ok(
        request.id,
        serde_json::json!({ "subscribed": true, "subscription_id": subscription.id }),
    );
    if write_response(&mut stream, ack).is_err() {
        state.services.broadcaster().detach(subscription.id);
        return;
    }

    let _ = stream.set_read_timeout(None);
    for event in subscription.receiver.iter() {
        let line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Failed to serialize push event");
                continue;
            }
        };
        if stream.write_all(&line).is_err() || stream.write_all(b"\n").is_err() {
            break;
        }
        let _ = stream.flush();
    }

    state.services.broadcaster().detach(subscription.id);
    tracing::debug!(subscription_id = subscription.id, "Subscription closed");
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(&response)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}
