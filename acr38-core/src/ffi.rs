//! The C-ABI boundary a reader module crosses to reach `acr38-cli`.
//!
//! Exactly three symbols are meant to be exported from the final
//! `cdylib`: `create_reader`, `destroy_reader`, and
//! `reader_library_version`. Everything else — open, close, transmit, and
//! so on — is reached through a vtable embedded in the object
//! `create_reader` returns, the same way a C++ `ICardReader*` carries its
//! own virtual dispatch table. A Rust trait object's vtable layout isn't
//! part of any ABI guarantee across compilations, so this module builds
//! one by hand out of plain `extern "C" fn` pointers instead of exposing a
//! `Box<dyn CardReader>` directly.
//!
//! `acr38-usb` supplies the concrete [`CardReader`] and exports the three
//! symbols as one-line wrappers around [`make_reader_handle`] and
//! [`destroy_reader_handle`]; this module supplies the vtable and
//! trampolines generically so that glue code never has to be hand-written
//! per backend.

use std::ffi::c_void;
use std::time::Duration;

use crate::facade::{Backend, CardReader, IsoProtocol, OpenParams};

/// Call succeeded.
pub const FFI_OK: i32 = 0;
/// Call failed; see `last_error`.
pub const FFI_ERR: i32 = -1;
/// The caller's output buffer was too small for the result. The required
/// size is still written to the out-length parameter.
pub const FFI_BUFFER_TOO_SMALL: i32 = -2;

/// C-ABI mirror of [`OpenParams`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiOpenParams {
    pub vid: u16,
    pub pid: u16,
    /// 0 = Auto, 1 = T0, 2 = T1.
    pub protocol: i32,
    pub detach_kernel_driver: u8,
    /// -1 means "no hint".
    pub interface_hint: i32,
    pub io_timeout_ms: u32,
}

impl From<FfiOpenParams> for OpenParams {
    fn from(p: FfiOpenParams) -> Self {
        OpenParams {
            vid: p.vid,
            pid: p.pid,
            protocol: match p.protocol {
                1 => IsoProtocol::T0,
                2 => IsoProtocol::T1,
                _ => IsoProtocol::Auto,
            },
            detach_kernel_driver: p.detach_kernel_driver != 0,
            interface_hint: if p.interface_hint < 0 {
                None
            } else {
                Some(p.interface_hint as u8)
            },
            io_timeout: Duration::from_millis(u64::from(p.io_timeout_ms)),
        }
    }
}

/// C-ABI mirror of [`crate::facade::ReaderInfo`]. `name` is NUL-padded but
/// not guaranteed NUL-terminated if it exactly fills the buffer — callers
/// should use `name_len`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiReaderInfo {
    pub name: [u8; 64],
    pub name_len: usize,
    pub vid: u16,
    pub pid: u16,
    /// 0 = CCID, 1 = ACS.
    pub backend: i32,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub has_intr: u8,
    pub intr_in: u8,
}

impl Default for FfiReaderInfo {
    fn default() -> Self {
        FfiReaderInfo {
            name: [0; 64],
            name_len: 0,
            vid: 0,
            pid: 0,
            backend: 0,
            bulk_in: 0,
            bulk_out: 0,
            has_intr: 0,
            intr_in: 0,
        }
    }
}

/// The hand-built vtable every reader module fills in once, generically,
/// via [`build_vtable`].
#[repr(C)]
pub struct ReaderVTable {
    pub open: unsafe extern "C" fn(*mut c_void, *const FfiOpenParams) -> i32,
    pub close: unsafe extern "C" fn(*mut c_void),
    pub info: unsafe extern "C" fn(*mut c_void, *mut FfiReaderInfo) -> i32,
    pub card_status: unsafe extern "C" fn(*mut c_void, *mut i32) -> i32,
    pub power_on: unsafe extern "C" fn(*mut c_void, *mut u8, usize, *mut usize) -> i32,
    pub power_off: unsafe extern "C" fn(*mut c_void) -> i32,
    pub wait_card_event: unsafe extern "C" fn(*mut c_void, u32, *mut i32) -> i32,
    #[allow(clippy::type_complexity)]
    pub transmit: unsafe extern "C" fn(*mut c_void, *const u8, usize, u32, *mut u8, usize, *mut usize) -> i32,
    #[allow(clippy::type_complexity)]
    pub vendor_control: unsafe extern "C" fn(*mut c_void, *const u8, usize, *mut u8, usize, *mut usize) -> i32,
    pub last_error: unsafe extern "C" fn(*mut c_void, *mut u8, usize, *mut usize) -> i32,
}

/// What `create_reader` actually returns: a vtable pointer plus an opaque
/// state pointer, exactly like a C++ object whose first word is its
/// vtable.
#[repr(C)]
pub struct ReaderHandle {
    pub vtable: *const ReaderVTable,
    pub state: *mut c_void,
}

struct ReaderState<T: CardReader> {
    reader: T,
    last_error: String,
}

fn copy_out(bytes: &[u8], out: *mut u8, out_cap: usize, out_len: *mut usize) -> i32 {
    unsafe {
        *out_len = bytes.len();
    }
    if bytes.len() > out_cap {
        return FFI_BUFFER_TOO_SMALL;
    }
    if !bytes.is_empty() {
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
        }
    }
    FFI_OK
}

unsafe fn state_of<'a, T: CardReader>(opaque: *mut c_void) -> &'a mut ReaderState<T> {
    &mut *opaque.cast::<ReaderState<T>>()
}

extern "C" fn trampoline_open<T: CardReader>(opaque: *mut c_void, params: *const FfiOpenParams) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    let params = unsafe { *params };
    match state.reader.open(&params.into()) {
        Ok(()) => FFI_OK,
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_close<T: CardReader>(opaque: *mut c_void) {
    let state = unsafe { state_of::<T>(opaque) };
    state.reader.close();
}

extern "C" fn trampoline_info<T: CardReader>(opaque: *mut c_void, out: *mut FfiReaderInfo) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    let info = state.reader.info();
    let mut ffi_info = FfiReaderInfo {
        vid: info.vid,
        pid: info.pid,
        backend: match info.backend {
            Backend::Ccid => 0,
            Backend::Acs => 1,
        },
        bulk_in: info.bulk_in,
        bulk_out: info.bulk_out,
        has_intr: u8::from(info.intr_in.is_some()),
        intr_in: info.intr_in.unwrap_or(0),
        ..FfiReaderInfo::default()
    };
    let bytes = info.name.as_bytes();
    let n = bytes.len().min(ffi_info.name.len());
    ffi_info.name[..n].copy_from_slice(&bytes[..n]);
    ffi_info.name_len = n;
    unsafe {
        *out = ffi_info;
    }
    FFI_OK
}

extern "C" fn trampoline_card_status<T: CardReader>(opaque: *mut c_void, out: *mut i32) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    match state.reader.card_status() {
        Ok(presence) => {
            unsafe {
                *out = presence as i32;
            }
            FFI_OK
        }
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_power_on<T: CardReader>(
    opaque: *mut c_void,
    out: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    match state.reader.power_on() {
        Ok(atr) => copy_out(&atr, out, out_cap, out_len),
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_power_off<T: CardReader>(opaque: *mut c_void) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    match state.reader.power_off() {
        Ok(()) => FFI_OK,
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_wait_card_event<T: CardReader>(opaque: *mut c_void, timeout_ms: u32, out: *mut i32) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    match state.reader.wait_card_event(Duration::from_millis(u64::from(timeout_ms))) {
        Ok(changed) => {
            unsafe {
                *out = i32::from(changed);
            }
            FFI_OK
        }
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_transmit<T: CardReader>(
    opaque: *mut c_void,
    capdu: *const u8,
    capdu_len: usize,
    timeout_ms: u32,
    out: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    let capdu = unsafe { std::slice::from_raw_parts(capdu, capdu_len) };
    match state
        .reader
        .transmit(capdu, Duration::from_millis(u64::from(timeout_ms)))
    {
        Ok(resp) => copy_out(&resp, out, out_cap, out_len),
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_vendor_control<T: CardReader>(
    opaque: *mut c_void,
    payload: *const u8,
    payload_len: usize,
    out: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    let payload = unsafe { std::slice::from_raw_parts(payload, payload_len) };
    match state.reader.vendor_control(payload) {
        Ok(resp) => copy_out(&resp, out, out_cap, out_len),
        Err(err) => {
            state.last_error = err.to_string();
            FFI_ERR
        }
    }
}

extern "C" fn trampoline_last_error<T: CardReader>(
    opaque: *mut c_void,
    out: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> i32 {
    let state = unsafe { state_of::<T>(opaque) };
    copy_out(state.last_error.as_bytes(), out, out_cap, out_len)
}

/// Builds the vtable for `T`. One instance per reader type, shared by
/// every handle of that type.
#[must_use]
pub fn build_vtable<T: CardReader>() -> ReaderVTable {
    ReaderVTable {
        open: trampoline_open::<T>,
        close: trampoline_close::<T>,
        info: trampoline_info::<T>,
        card_status: trampoline_card_status::<T>,
        power_on: trampoline_power_on::<T>,
        power_off: trampoline_power_off::<T>,
        wait_card_event: trampoline_wait_card_event::<T>,
        transmit: trampoline_transmit::<T>,
        vendor_control: trampoline_vendor_control::<T>,
        last_error: trampoline_last_error::<T>,
    }
}

/// Boxes `reader` behind a freshly-built vtable and leaks both onto the
/// heap as a [`ReaderHandle`]. The handle must later be passed to
/// [`destroy_reader_handle`] exactly once.
#[must_use]
pub fn make_reader_handle<T: CardReader + 'static>(reader: T) -> *mut ReaderHandle {
    let vtable = Box::leak(Box::new(build_vtable::<T>())) as *const ReaderVTable;
    let state = Box::new(ReaderState {
        reader,
        last_error: String::new(),
    });
    let handle = Box::new(ReaderHandle {
        vtable,
        state: Box::into_raw(state).cast::<c_void>(),
    });
    Box::into_raw(handle)
}

/// Frees a handle created by [`make_reader_handle`] with the same `T`.
///
/// # Safety
/// `handle` must have been returned by `make_reader_handle::<T>` and not
/// already freed.
pub unsafe fn destroy_reader_handle<T: CardReader>(handle: *mut ReaderHandle) {
    if handle.is_null() {
        return;
    }
    let handle = Box::from_raw(handle);
    drop(Box::from_raw(handle.state.cast::<ReaderState<T>>()));
    // The vtable is immutable and shared across every handle of this type
    // in the process; it is intentionally never freed.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::ReaderInfo;
    use crate::presence::CardPresence;

    struct FakeReader {
        opened: bool,
    }

    impl CardReader for FakeReader {
        fn open(&mut self, _params: &OpenParams) -> Result<(), crate::error::ReaderError> {
            self.opened = true;
            Ok(())
        }
        fn close(&mut self) {
            self.opened = false;
        }
        fn info(&self) -> ReaderInfo {
            ReaderInfo {
                name: "fake".to_string(),
                vid: 0x072F,
                pid: 0x9000,
                backend: Backend::Ccid,
                bulk_in: 0x81,
                bulk_out: 0x02,
                intr_in: None,
            }
        }
        fn card_status(&mut self) -> Result<CardPresence, crate::error::ReaderError> {
            Ok(CardPresence::PresentActive)
        }
        fn power_on(&mut self) -> Result<Vec<u8>, crate::error::ReaderError> {
            Ok(vec![0x3B, 0x00])
        }
        fn power_off(&mut self) -> Result<(), crate::error::ReaderError> {
            Ok(())
        }
        fn wait_card_event(&mut self, _timeout: Duration) -> Result<bool, crate::error::ReaderError> {
            Ok(false)
        }
        fn transmit(&mut self, _capdu: &[u8], _timeout: Duration) -> Result<Vec<u8>, crate::error::ReaderError> {
            Ok(vec![0x90, 0x00])
        }
        fn vendor_control(&mut self, _payload: &[u8]) -> Result<Vec<u8>, crate::error::ReaderError> {
            Ok(vec![])
        }
    }

    #[test]
    fn handle_round_trips_through_the_vtable() {
        let handle = make_reader_handle(FakeReader { opened: false });
        unsafe {
            let h = &*handle;
            let params = FfiOpenParams {
                vid: 0x072F,
                pid: 0x9000,
                protocol: 0,
                detach_kernel_driver: 1,
                interface_hint: -1,
                io_timeout_ms: 2000,
            };
            let rc = ((*h.vtable).open)(h.state, &params);
            assert_eq!(rc, FFI_OK);

            let mut atr = [0u8; 16];
            let mut atr_len = 0usize;
            let rc = ((*h.vtable).power_on)(h.state, atr.as_mut_ptr(), atr.len(), &mut atr_len);
            assert_eq!(rc, FFI_OK);
            assert_eq!(&atr[..atr_len], &[0x3B, 0x00]);

            destroy_reader_handle::<FakeReader>(handle);
        }
    }
}
