//! Dynamic loading of a reader module and a safe wrapper around its
//! C-ABI vtable.
//!
//! Mirrors `rik2gui/include/ReaderSession.hpp`'s ownership discipline:
//! load the library, create exactly one reader instance, destroy it, then
//! unload the library, in that order, on drop.

use std::ffi::CStr;
use std::time::Duration;

use libloading::{Library, Symbol};

use acr38_core::error::ReaderError;
use acr38_core::ffi::{FfiOpenParams, FfiReaderInfo, ReaderHandle, FFI_BUFFER_TOO_SMALL, FFI_OK};
use acr38_core::facade::{Backend, IsoProtocol, OpenParams, ReaderInfo};
use acr38_core::presence::CardPresence;
use acr38_core::traversal::Transmit;

type CreateReaderFn = unsafe extern "C" fn() -> *mut ReaderHandle;
type DestroyReaderFn = unsafe extern "C" fn(*mut ReaderHandle);
type VersionFn = unsafe extern "C" fn() -> *const std::os::raw::c_char;

/// A loaded reader module plus, once opened, its live device handle.
///
/// The `Library` must outlive `handle` — dropping the library first would
/// unmap the vtable's code while a handle still points at it. Field order
/// in this struct fixes the drop order accordingly (fields drop in
/// declaration order), but `close` is still called explicitly in `Drop`
/// to make the sequencing obvious rather than relying on it.
pub struct ReaderSession {
    handle: *mut ReaderHandle,
    destroy: DestroyReaderFn,
    _library: Library,
}

/// Maximum size of an expected response buffer (ATR, transmit reply,
/// vendor-control reply). Generous relative to any ISO 7816-4 short-APDU
/// exchange.
const MAX_RESPONSE_LEN: usize = 4096;

impl ReaderSession {
    /// Loads the reader module at `lib_path` and creates one reader
    /// instance.
    ///
    /// # Errors
    /// Returns [`ReaderError::TransportInit`] if the library can't be
    /// loaded or doesn't export all three required symbols, or if
    /// `create_reader` returns a null handle.
    pub fn load(lib_path: &str) -> Result<Self, ReaderError> {
        let library =
            unsafe { Library::new(lib_path) }.map_err(|err| ReaderError::TransportInit(err.to_string()))?;

        let create: Symbol<CreateReaderFn> = unsafe { library.get(b"create_reader\0") }
            .map_err(|err| ReaderError::TransportInit(err.to_string()))?;
        let destroy: Symbol<DestroyReaderFn> = unsafe { library.get(b"destroy_reader\0") }
            .map_err(|err| ReaderError::TransportInit(err.to_string()))?;

        let handle = unsafe { create() };
        if handle.is_null() {
            return Err(ReaderError::TransportInit(
                "create_reader returned a null handle".to_string(),
            ));
        }

        let destroy = *destroy;
        Ok(ReaderSession {
            handle,
            destroy,
            _library: library,
        })
    }

    /// Reads the loaded module's version string.
    ///
    /// # Errors
    /// Returns [`ReaderError::TransportInit`] if the symbol can't be
    /// resolved.
    pub fn library_version(&self) -> Result<String, ReaderError> {
        let version: Symbol<VersionFn> =
            unsafe { self._library.get(b"reader_library_version\0") }.map_err(|err| ReaderError::TransportInit(err.to_string()))?;
        let ptr = unsafe { version() };
        if ptr.is_null() {
            return Ok(String::new());
        }
        Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn vtable(&self) -> &acr38_core::ffi::ReaderVTable {
        unsafe { &*(*self.handle).vtable }
    }

    fn state(&self) -> *mut std::ffi::c_void {
        unsafe { (*self.handle).state }
    }

    fn last_error(&self) -> String {
        let mut buf = vec![0u8; 512];
        let mut len = 0usize;
        let rc = unsafe { (self.vtable().last_error)(self.state(), buf.as_mut_ptr(), buf.len(), &mut len) };
        if rc != FFI_OK && rc != FFI_BUFFER_TOO_SMALL {
            return "reader module error".to_string();
        }
        buf.truncate(len.min(buf.len()));
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn err(&self) -> ReaderError {
        ReaderError::TransportInit(self.last_error())
    }

    /// Opens the device matching `params`.
    ///
    /// # Errors
    /// Surfaces whatever [`acr38_core::facade::CardReader::open`] reported
    /// on the other side of the FFI boundary.
    pub fn open(&mut self, params: &OpenParams) -> Result<(), ReaderError> {
        let ffi_params = FfiOpenParams {
            vid: params.vid,
            pid: params.pid,
            protocol: match params.protocol {
                IsoProtocol::Auto => 0,
                IsoProtocol::T0 => 1,
                IsoProtocol::T1 => 2,
            },
            detach_kernel_driver: u8::from(params.detach_kernel_driver),
            interface_hint: params.interface_hint.map_or(-1, i32::from),
            io_timeout_ms: u32::try_from(params.io_timeout.as_millis()).unwrap_or(u32::MAX),
        };
        let rc = unsafe { (self.vtable().open)(self.state(), &ffi_params) };
        if rc == FFI_OK {
            Ok(())
        } else {
            Err(self.err())
        }
    }

    /// Closes the device. Never fails.
    pub fn close(&mut self) {
        unsafe {
            (self.vtable().close)(self.state());
        }
    }

    /// Reads descriptive information about the open device.
    #[must_use]
    pub fn info(&self) -> ReaderInfo {
        let mut ffi_info = FfiReaderInfo::default();
        unsafe {
            (self.vtable().info)(self.state(), &mut ffi_info);
        }
        ReaderInfo {
            name: String::from_utf8_lossy(&ffi_info.name[..ffi_info.name_len]).into_owned(),
            vid: ffi_info.vid,
            pid: ffi_info.pid,
            backend: if ffi_info.backend == 0 { Backend::Ccid } else { Backend::Acs },
            bulk_in: ffi_info.bulk_in,
            bulk_out: ffi_info.bulk_out,
            intr_in: if ffi_info.has_intr != 0 { Some(ffi_info.intr_in) } else { None },
        }
    }

    /// Polls card presence.
    ///
    /// # Errors
    /// Surfaces the underlying reader module's error.
    pub fn card_status(&mut self) -> Result<CardPresence, ReaderError> {
        let mut raw = 0i32;
        let rc = unsafe { (self.vtable().card_status)(self.state(), &mut raw) };
        if rc != FFI_OK {
            return Err(self.err());
        }
        Ok(match raw {
            0 => CardPresence::NotPresent,
            1 => CardPresence::PresentInactive,
            2 => CardPresence::PresentActive,
            _ => CardPresence::Unknown,
        })
    }

    /// Powers off the card.
    ///
    /// # Errors
    /// Surfaces the underlying reader module's error.
    pub fn power_off(&mut self) -> Result<(), ReaderError> {
        let rc = unsafe { (self.vtable().power_off)(self.state()) };
        if rc == FFI_OK {
            Ok(())
        } else {
            Err(self.err())
        }
    }

    /// Blocks up to `timeout` for a presence change on the interrupt
    /// endpoint.
    ///
    /// # Errors
    /// Surfaces the underlying reader module's error.
    pub fn wait_card_event(&mut self, timeout: Duration) -> Result<bool, ReaderError> {
        let mut changed = 0i32;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let rc = unsafe { (self.vtable().wait_card_event)(self.state(), timeout_ms, &mut changed) };
        if rc != FFI_OK {
            return Err(self.err());
        }
        Ok(changed != 0)
    }

    /// Sends a vendor-control payload. The ACR38 family reserves this
    /// extension point and always returns an empty reply.
    ///
    /// # Errors
    /// Surfaces the underlying reader module's error.
    pub fn vendor_control(&mut self, payload: &[u8]) -> Result<Vec<u8>, ReaderError> {
        let mut buf = vec![0u8; MAX_RESPONSE_LEN];
        let mut len = 0usize;
        let rc = unsafe {
            (self.vtable().vendor_control)(self.state(), payload.as_ptr(), payload.len(), buf.as_mut_ptr(), buf.len(), &mut len)
        };
        if rc != FFI_OK {
            return Err(self.err());
        }
        buf.truncate(len);
        Ok(buf)
    }
}

impl Transmit for ReaderSession {
    fn power_on(&mut self, _timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        let mut buf = vec![0u8; MAX_RESPONSE_LEN];
        let mut len = 0usize;
        let rc = unsafe { (self.vtable().power_on)(self.state(), buf.as_mut_ptr(), buf.len(), &mut len) };
        if rc != FFI_OK {
            return Err(self.err());
        }
        buf.truncate(len);
        Ok(buf)
    }

    fn transmit(&mut self, capdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReaderError> {
        let mut buf = vec![0u8; MAX_RESPONSE_LEN];
        let mut len = 0usize;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let rc = unsafe {
            (self.vtable().transmit)(
                self.state(),
                capdu.as_ptr(),
                capdu.len(),
                timeout_ms,
                buf.as_mut_ptr(),
                buf.len(),
                &mut len,
            )
        };
        if rc != FFI_OK {
            return Err(self.err());
        }
        buf.truncate(len);
        Ok(buf)
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.close();
        unsafe {
            (self.destroy)(self.handle);
        }
    }
}
