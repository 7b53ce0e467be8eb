//! VM execution state flags.

use bitflags::bitflags;

bitflags! {
    /// Indicates the status of the virtual machine.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct VmState: u8 {
        /// Execution has not started or is currently running.
        const NONE = 0;
        /// Execution completed successfully.
        const HALT = 1 << 0;
        /// Execution terminated because of an unhandled fault.
        const FAULT = 1 << 1;
    }
}

impl VmState {
    /// Returns `true` when the VM has halted successfully.
    pub fn is_halt(self) -> bool {
        self.contains(VmState::HALT)
    }

    /// Returns `true` when the VM faulted.
    pub fn is_fault(self) -> bool {
        self.contains(VmState::FAULT)
    }
}
