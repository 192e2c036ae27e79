//! Routes FFmpeg's log output through Rust's `log` crate.

use std::sync::Once;

extern crate ffmpeg_next as ffmpeg;
extern crate ffmpeg_sys_next as ffi;

static FFMPEG_INIT: Once = Once::new();

/// Custom FFmpeg log callback that forwards messages to the `log` crate.
///
/// # Safety
/// Called by FFmpeg's internal logging system. Uses `av_log_format_line2` to
/// safely format the variadic arguments into a fixed buffer.
unsafe extern "C" fn ffmpeg_log_callback(
    ptr: *mut libc::c_void,
    level: libc::c_int,
    fmt: *const libc::c_char,
    vl: ffi::va_list,
) {
    let rust_level = match level {
        ffi::AV_LOG_PANIC | ffi::AV_LOG_FATAL | ffi::AV_LOG_ERROR => log::Level::Error,
        ffi::AV_LOG_WARNING => log::Level::Warn,
        ffi::AV_LOG_INFO => log::Level::Info,
        ffi::AV_LOG_VERBOSE => log::Level::Debug,
        ffi::AV_LOG_DEBUG | ffi::AV_LOG_TRACE => log::Level::Trace,
        _ => return,
    };

    if !log::log_enabled!(rust_level) {
        return;
    }

    let mut buf = [0u8; 1024];
    let mut print_prefix: libc::c_int = 1;
    let written = unsafe {
        ffi::av_log_format_line2(
            ptr,
            level,
            fmt,
            vl,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len() as libc::c_int,
            &mut print_prefix,
        )
    };
    if written < 0 {
        return;
    }

    let len = (written as usize).min(buf.len() - 1);
    let msg = std::str::from_utf8(&buf[..len])
        .unwrap_or_default()
        .trim_end();
    if msg.is_empty() {
        return;
    }

    log::log!(target: "ffmpeg", rust_level, "{}", msg);
}

/// Initialise FFmpeg exactly once, with its logging redirected to `log`.
pub fn ensure_init() {
    FFMPEG_INIT.call_once(|| {
        ffmpeg::init().expect("Failed to initialise FFmpeg");
        unsafe {
            ffi::av_log_set_callback(Some(ffmpeg_log_callback));
        }
    });
}
