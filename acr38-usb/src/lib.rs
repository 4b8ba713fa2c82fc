//! The ACR38 reader module: a `cdylib` that `acr38-cli` loads at runtime.
//!
//! Exactly three symbols are exported — `create_reader`, `destroy_reader`,
//! `reader_library_version` — per [`acr38_core::ffi`]'s vtable boundary.
//! Everything else lives behind the vtable `create_reader` hands back.

pub mod locator;
pub mod reader;
pub mod transport;

use std::ffi::{c_char, CString};
use std::sync::OnceLock;

use acr38_core::ffi::{destroy_reader_handle, make_reader_handle, ReaderHandle};

use reader::Acr38Reader;

/// Creates a new, unopened reader module instance.
///
/// # Safety
/// The returned pointer is owned by the caller and must be passed to
/// [`destroy_reader`] exactly once, and never used from more than one
/// thread at a time.
#[no_mangle]
pub unsafe extern "C" fn create_reader() -> *mut ReaderHandle {
    make_reader_handle(Acr38Reader::new())
}

/// Destroys a reader module instance created by [`create_reader`].
///
/// # Safety
/// `handle` must have come from [`create_reader`] in this library and not
/// already have been destroyed.
#[no_mangle]
pub unsafe extern "C" fn destroy_reader(handle: *mut ReaderHandle) {
    destroy_reader_handle::<Acr38Reader>(handle);
}

fn version_cstring() -> &'static CString {
    static VERSION: OnceLock<CString> = OnceLock::new();
    VERSION.get_or_init(|| CString::new(env!("CARGO_PKG_VERSION")).unwrap_or_default())
}

/// Returns this module's version as a NUL-terminated string with static
/// lifetime.
#[no_mangle]
pub extern "C" fn reader_library_version() -> *const c_char {
    version_cstring().as_ptr()
}
