//! # Interrupt Levels
//!
//! The scheduler's registries are protected by masking interrupts, never by a
//! blocking lock: on a single CPU, a section that runs with interrupts off
//! cannot be interleaved with anything else. [`IntrOff`] turns that discipline
//! into a type. Every registry mutator takes one, and the only way to obtain
//! one is through the scheduler after it has checked the CPU.

/// Interrupt delivery state of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    On,
    Off,
}

impl IntrLevel {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }
}

/// Proof that interrupts were masked when it was created.
///
/// Zero-sized and `Copy`: it costs nothing to thread through a call chain.
/// It is neither `Send` nor `Sync`, so it cannot leak into another context.
/// Because a copy can outlive its section, the scheduler re-checks the CPU
/// wherever a token is spent on a registry.
#[derive(Debug, Clone, Copy)]
pub struct IntrOff {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl IntrOff {
    /// # Safety contract
    /// Callers must have just observed that interrupts are masked.
    pub(crate) const fn new_unchecked() -> Self {
        IntrOff {
            _not_send: core::marker::PhantomData,
        }
    }
}

// Raw interrupt-flag control for the singleton lock. On the host build these
// are inert: the simulated CPU keeps its own flag.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod raw {
    #[inline]
    pub fn are_enabled() -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    #[inline]
    pub fn disable() {
        x86_64::instructions::interrupts::disable();
    }

    #[inline]
    pub fn enable() {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod raw {
    #[inline]
    pub fn are_enabled() -> bool {
        false
    }

    #[inline]
    pub fn disable() {}

    #[inline]
    pub fn enable() {}
}

pub(crate) use raw::{are_enabled, disable, enable};
