//! USB enumeration: finds the ACR38 interface with a usable bulk IN/OUT
//! pair, opens it, and claims it.

use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};

use acr38_core::error::ReaderError;
use acr38_core::facade::{Backend, OpenParams};

const USB_CLASS_CCID: u8 = 0x0B;

/// A device that has been opened and had its interface claimed, ready for
/// bulk transfers.
pub struct ClaimedDevice {
    pub handle: DeviceHandle<Context>,
    pub interface_number: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub intr_in: Option<u8>,
    pub backend: Backend,
    pub vid: u16,
    pub pid: u16,
}

struct Candidate {
    interface_number: u8,
    bulk_in: u8,
    bulk_out: u8,
    intr_in: Option<u8>,
    backend: Backend,
}

fn find_candidate_interface(device: &Device<Context>, interface_hint: Option<u8>) -> Option<Candidate> {
    let config = device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))
        .ok()?;

    for interface in config.interfaces() {
        for alt_setting in interface.descriptors() {
            if let Some(hint) = interface_hint {
                if alt_setting.interface_number() != hint {
                    continue;
                }
            }
            let mut bulk_in = None;
            let mut bulk_out = None;
            let mut intr_in = None;
            for endpoint in alt_setting.endpoint_descriptors() {
                match (endpoint.transfer_type(), endpoint.direction()) {
                    (TransferType::Bulk, Direction::In) => bulk_in = Some(endpoint.address()),
                    (TransferType::Bulk, Direction::Out) => bulk_out = Some(endpoint.address()),
                    (TransferType::Interrupt, Direction::In) => intr_in = Some(endpoint.address()),
                    _ => {}
                }
            }
            if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                let backend = if alt_setting.class_code() == USB_CLASS_CCID {
                    Backend::Ccid
                } else {
                    Backend::Acs
                };
                return Some(Candidate {
                    interface_number: alt_setting.interface_number(),
                    bulk_in,
                    bulk_out,
                    intr_in,
                    backend,
                });
            }
        }
    }
    None
}

/// Scans every attached USB device for one matching `params.vid`/`params.pid`
/// that exposes a bulk IN/OUT pair, opens it, detaches the kernel driver if
/// requested, and claims the interface.
///
/// # Errors
/// Returns [`ReaderError::TransportInit`] if libusb itself can't be used,
/// [`ReaderError::DeviceNotFound`] if no matching device has a usable
/// interface, and [`ReaderError::InterfaceBusy`] if opening or claiming
/// fails (typically because another process, e.g. a PC/SC daemon, already
/// holds the interface).
pub fn find_and_claim(params: &OpenParams) -> Result<ClaimedDevice, ReaderError> {
    let context = Context::new().map_err(|err| ReaderError::TransportInit(err.to_string()))?;
    let devices = context
        .devices()
        .map_err(|err| ReaderError::TransportInit(err.to_string()))?;

    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() != params.vid || descriptor.product_id() != params.pid {
            continue;
        }
        let Some(candidate) = find_candidate_interface(&device, params.interface_hint) else {
            continue;
        };

        let mut handle = device
            .open()
            .map_err(|err| ReaderError::InterfaceBusy(err.to_string()))?;

        if params.detach_kernel_driver {
            if let Ok(true) = handle.kernel_driver_active(candidate.interface_number) {
                let _ = handle.detach_kernel_driver(candidate.interface_number);
            }
        }

        handle
            .claim_interface(candidate.interface_number)
            .map_err(|err| ReaderError::InterfaceBusy(err.to_string()))?;

        return Ok(ClaimedDevice {
            handle,
            interface_number: candidate.interface_number,
            bulk_in: candidate.bulk_in,
            bulk_out: candidate.bulk_out,
            intr_in: candidate.intr_in,
            backend: candidate.backend,
            vid: descriptor.vendor_id(),
            pid: descriptor.product_id(),
        });
    }

    Err(ReaderError::DeviceNotFound {
        vid: params.vid,
        pid: params.pid,
    })
}

impl ClaimedDevice {
    /// Releases the interface and drops the handle. Errors are swallowed;
    /// `close` never fails.
    pub fn release(&mut self) {
        let _ = self.handle.release_interface(self.interface_number);
    }
}
