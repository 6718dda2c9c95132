use std::{
    ffi::{c_char, c_void, CStr, CString},
    ptr,
    sync::{Arc, Mutex},
};

use serde_json::{json, Value};
use settings_core::{PetType, Runtime};
use tracing::{debug, error};

type GsEventCallback = unsafe extern "C" fn(event_json: *const c_char, user_data: *mut c_void);

#[derive(Clone, Copy)]
struct CallbackRegistration {
    callback: GsEventCallback,
    user_data: usize,
}

pub struct GsRuntimeHandle {
    runtime: Runtime,
    callback: Arc<Mutex<Option<CallbackRegistration>>>,
}

/// Creates a settings runtime from a JSON config (null or blank for defaults).
///
/// Returns null when the config is invalid or the runtime cannot start.
///
/// # Safety
///
/// `config_json` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gs_runtime_new(config_json: *const c_char) -> *mut GsRuntimeHandle {
    let config = if config_json.is_null() {
        String::new()
    } else {
        match CStr::from_ptr(config_json).to_str() {
            Ok(value) => value.to_string(),
            Err(err) => {
                error!(error = %err, "gs_runtime_new: config json is not UTF-8");
                return ptr::null_mut();
            }
        }
    };

    let runtime = match Runtime::new(&config) {
        Ok(value) => value,
        Err(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "gs_runtime_new: failed to start settings runtime");
            return ptr::null_mut();
        }
    };

    let callback = Arc::new(Mutex::new(None::<CallbackRegistration>));
    let registration = Arc::clone(&callback);
    runtime.set_event_callback(move |_event, payload| {
        let current = *registration
            .lock()
            .expect("ffi callback registration mutex poisoned");
        let Some(current) = current else {
            return;
        };
        if let Ok(c_payload) = CString::new(payload.to_string()) {
            unsafe { (current.callback)(c_payload.as_ptr(), current.user_data as *mut c_void) };
        }
    });

    Box::into_raw(Box::new(GsRuntimeHandle { runtime, callback }))
}

/// Flushes pending writes and releases the runtime.
///
/// # Safety
///
/// `handle` must be null or come from [`gs_runtime_new`], and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn gs_runtime_free(handle: *mut GsRuntimeHandle) {
    if handle.is_null() {
        return;
    }
    let boxed = Box::from_raw(handle);
    boxed.runtime.clear_event_callback();
    *boxed
        .callback
        .lock()
        .expect("ffi callback registration mutex poisoned") = None;
}

/// Registers (or, with a null callback, removes) the event listener.
///
/// # Safety
///
/// `handle` must be null or a live handle from [`gs_runtime_new`]. The callback
/// runs on a runtime worker thread and must not call back into this library.
#[no_mangle]
pub unsafe extern "C" fn gs_set_event_callback(
    handle: *mut GsRuntimeHandle,
    callback: Option<GsEventCallback>,
    user_data: *mut c_void,
) {
    if handle.is_null() {
        return;
    }

    let handle = &*handle;
    *handle
        .callback
        .lock()
        .expect("ffi callback registration mutex poisoned") =
        callback.map(|callback| CallbackRegistration {
            callback,
            user_data: user_data as usize,
        });
}

/// Runs one JSON command. The returned string must be released with
/// [`gs_free_c_string`].
///
/// # Safety
///
/// `handle` must be null or a live handle; `request_json` must be null or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gs_invoke_json(
    handle: *mut GsRuntimeHandle,
    request_json: *const c_char,
) -> *mut c_char {
    if handle.is_null() {
        return into_c_string(json_error("invalid_handle", "runtime handle is null").to_string());
    }
    if request_json.is_null() {
        return into_c_string(json_error("invalid_request", "request_json is null").to_string());
    }

    let request = match CStr::from_ptr(request_json).to_str() {
        Ok(value) => value,
        Err(err) => {
            return into_c_string(
                json_error("invalid_request", &format!("request_json must be UTF-8: {err}"))
                    .to_string(),
            );
        }
    };

    let handle = &*handle;
    into_c_string(handle.runtime.invoke_json(request))
}

/// Whether the persisted record has finished loading.
///
/// # Safety
///
/// `handle` must be null or a live handle from [`gs_runtime_new`].
#[no_mangle]
pub unsafe extern "C" fn gs_is_initialized(handle: *mut GsRuntimeHandle) -> bool {
    if handle.is_null() {
        return false;
    }
    (*handle).runtime.is_initialized()
}

/// Returns the current general settings as a camelCase JSON object, or null
/// while the record is still loading. Free the result with [`gs_free_c_string`].
///
/// # Safety
///
/// `handle` must be null or a live handle from [`gs_runtime_new`].
#[no_mangle]
pub unsafe extern "C" fn gs_get_general_settings(handle: *mut GsRuntimeHandle) -> *mut c_char {
    if handle.is_null() {
        return ptr::null_mut();
    }

    let settings = match (*handle).runtime.general_settings() {
        Ok(settings) => settings,
        Err(err) => {
            debug!(code = err.code(), "gs_get_general_settings: settings unavailable");
            return ptr::null_mut();
        }
    };
    match serde_json::to_string(&*settings) {
        Ok(text) => into_c_string(text),
        Err(err) => {
            error!(error = %err, "gs_get_general_settings: failed to encode settings");
            ptr::null_mut()
        }
    }
}

/// Renames one pet (`"dog"` or `"cat"`). Returns false for an unknown pet,
/// invalid strings, or when the record has not loaded yet.
///
/// # Safety
///
/// `handle` must be null or a live handle; `pet` and `name` must be null or
/// NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn gs_set_pet_name(
    handle: *mut GsRuntimeHandle,
    pet: *const c_char,
    name: *const c_char,
) -> bool {
    if handle.is_null() || pet.is_null() || name.is_null() {
        return false;
    }

    let (Ok(pet), Ok(name)) = (CStr::from_ptr(pet).to_str(), CStr::from_ptr(name).to_str()) else {
        error!("gs_set_pet_name: arguments must be UTF-8");
        return false;
    };
    let pet = match serde_json::from_value::<PetType>(Value::String(pet.to_string())) {
        Ok(pet) => pet,
        Err(err) => {
            error!(error = %err, "gs_set_pet_name: unknown pet");
            return false;
        }
    };

    match (*handle).runtime.set_pet_name(pet, name) {
        Ok(_) => true,
        Err(err) => {
            error!(error = %err, "gs_set_pet_name: rename refused");
            false
        }
    }
}

/// # Safety
///
/// `ptr` must be null or a string returned by this library, freed at most once.
#[no_mangle]
pub unsafe extern "C" fn gs_free_c_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(CString::from_raw(ptr));
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(text) => text.into_raw(),
        Err(_) => CString::new(
            r#"{"ok":false,"error":{"code":"encoding_failure","message":"response contains invalid NUL"}}"#,
        )
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut()),
    }
}

fn json_error(code: &str, message: &str) -> serde_json::Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message
        }
    })
}
