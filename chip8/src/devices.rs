//! IO device interface
use crate::error::Chip8Error;

/// Hooks for the host application to receive output from the virtual machine.
///
/// The interpreter never pushes pixel data. On [`Devices::redraw`] the host
/// reads the framebuffer back from the VM.
///
/// Callbacks are invoked from the scheduler threads while the VM is locked,
/// so implementations must not call back into the VM.
pub trait Devices: Send {
    /// The framebuffer changed since the last signal.
    fn redraw(&self);

    /// The sound timer is active for this 60Hz tick.
    fn beep(&self);

    /// The program failed and the CPU stopped executing it.
    fn error(&self, err: &Chip8Error);
}

/// Devices that discard all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevices;

impl Devices for NullDevices {
    fn redraw(&self) {}

    fn beep(&self) {}

    fn error(&self, _err: &Chip8Error) {}
}
