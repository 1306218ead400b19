use crate::mem::Vm;
use alloc::boxed::Box;
use once_cell::race::OnceBox;

static VM: OnceBox<Vm> = OnceBox::new();

/// Install the kernel-wide memory core. Hands `vm` back if one is already installed.
pub fn init_vm(vm: Vm) -> Result<(), Box<Vm>> {
    VM.set(Box::new(vm))
}

/// The kernel-wide memory core.
///
/// # Panics
///
/// Panics if [`init_vm`] has not been called.
pub fn unwrap_vm() -> &'static Vm {
    VM.get().expect("VM not initialized.")
}

pub fn try_vm() -> Option<&'static Vm> {
    VM.get()
}
