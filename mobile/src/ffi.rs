//! C ABI for the app's UI layer.
//!
//! The UI creates one engine at startup, calls `localchat_engine_generate`
//! from a background queue and receives status updates through a callback:
//! a `GENERATING` status, then exactly one `FINISHED` or `FAILED` status.
//! The callback runs on the calling thread; the UI is responsible for
//! hopping back to its main thread.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;

use localchat::{ErrorKind, GenerationConfig, Status};

use super::ChatEngine;

pub const LOCALCHAT_STATUS_GENERATING: c_int = 0;
pub const LOCALCHAT_STATUS_FINISHED: c_int = 1;
pub const LOCALCHAT_STATUS_FAILED: c_int = 2;

pub const LOCALCHAT_OK: c_int = 0;
pub const LOCALCHAT_ERR_RESOURCE_UNAVAILABLE: c_int = 1;
pub const LOCALCHAT_ERR_INFERENCE_FAILED: c_int = 2;
pub const LOCALCHAT_ERR_INVALID_ARGUMENT: c_int = -1;

/// Receives `(status_kind, message, user_data)`. `message` is only valid for
/// the duration of the call.
pub type StatusCallback = extern "C" fn(kind: c_int, message: *const c_char, user_data: *mut c_void);

fn path_arg(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    let c_str = unsafe { CStr::from_ptr(ptr) };
    Some(PathBuf::from(c_str.to_string_lossy().into_owned()))
}

/// Install a stderr log subscriber. Safe to call more than once.
#[no_mangle]
pub extern "C" fn localchat_init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localchat=info,localchat_mobile=info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Create an engine. Any path may be NULL; a NULL config uses the defaults.
///
/// Returns NULL only when the config file cannot be loaded. Missing or broken
/// model and tokenizer files still yield an engine whose calls fail with
/// `LOCALCHAT_ERR_RESOURCE_UNAVAILABLE`.
#[no_mangle]
pub extern "C" fn localchat_engine_new(
    model_path: *const c_char,
    tokenizer_path: *const c_char,
    config_path: *const c_char,
) -> *mut ChatEngine {
    let config = match path_arg(config_path) {
        Some(path) => match GenerationConfig::from_json(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("invalid generation config: {err:#}");
                return std::ptr::null_mut();
            }
        },
        None => GenerationConfig::default(),
    };
    let model = path_arg(model_path);
    let tokenizer = path_arg(tokenizer_path);
    let engine = ChatEngine::load(model.as_deref(), tokenizer.as_deref(), config);
    Box::into_raw(Box::new(engine))
}

/// Run one generation call, blocking until it completes.
#[no_mangle]
pub extern "C" fn localchat_engine_generate(
    engine: *const ChatEngine,
    prompt: *const c_char,
    callback: Option<StatusCallback>,
    user_data: *mut c_void,
) -> c_int {
    if engine.is_null() || prompt.is_null() {
        return LOCALCHAT_ERR_INVALID_ARGUMENT;
    }
    let engine = unsafe { &*engine };
    let prompt = unsafe { CStr::from_ptr(prompt) }.to_string_lossy();

    let result = engine.generate_with(&prompt, |status| {
        let Some(callback) = callback else { return };
        let kind = match &status {
            Status::Generating => LOCALCHAT_STATUS_GENERATING,
            Status::Finished(_) => LOCALCHAT_STATUS_FINISHED,
            Status::Failed(_) => LOCALCHAT_STATUS_FAILED,
        };
        let message = CString::new(status.to_string().replace('\0', "")).unwrap_or_default();
        callback(kind, message.as_ptr(), user_data);
    });

    match result {
        Ok(_) => LOCALCHAT_OK,
        Err(err) => match err.kind() {
            ErrorKind::ResourceUnavailable => LOCALCHAT_ERR_RESOURCE_UNAVAILABLE,
            ErrorKind::InferenceFailed => LOCALCHAT_ERR_INFERENCE_FAILED,
        },
    }
}

#[no_mangle]
pub extern "C" fn localchat_engine_free(engine: *mut ChatEngine) {
    if !engine.is_null() {
        unsafe { drop(Box::from_raw(engine)); }
    }
}
