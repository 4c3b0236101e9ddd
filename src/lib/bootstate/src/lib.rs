/* SPDX-License-Identifier: GPL-2.0-only */
#![cfg_attr(not(test), no_std)]

use heapless::Vec;
use log::{debug, error};
use util::cb_err::CbErr;

/// The boot state machine provides a mechanism for calls to be made through-
/// out the main boot process. The boot process is separated into discrete
/// states. Upon a state's entry and exit and callbacks can be made.
///
/// Below is the current flow from top to bottom:
///
/// ```text
///        start
///          |
///    BS_PRE_DEVICE
///          |
///    BS_DEV_INIT_CHIPS
///          |
///    BS_DEV_ENUMERATE
///          |
///    BS_DEV_RESOURCES
///          |
///    BS_DEV_ENABLE
///          |
///    BS_DEV_INIT
///          |
///    BS_POST_DEVICE
///          |
///    BS_OS_RESUME_CHECK -------- BS_OS_RESUME
///          |                          |
///    BS_WRITE_TABLES              os handoff
///          |
///    BS_PAYLOAD_LOAD
///          |
///    BS_PAYLOAD_BOOT
///          |
///      payload run
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootState {
    PreDevice,
    DevInitChips,
    DevEnumerate,
    DevResources,
    DevEnable,
    DevInit,
    PostDevice,
    OSResumeCheck,
    OSResume,
    WriteTables,
    PayloadLoad,
    PayloadBoot,
}

impl BootState {
    /// The state that follows `self`, or `None` once control leaves firmware.
    ///
    /// `resume` selects the S3 path out of `OSResumeCheck`.
    pub const fn next(self, resume: bool) -> Option<Self> {
        match self {
            Self::PreDevice => Some(Self::DevInitChips),
            Self::DevInitChips => Some(Self::DevEnumerate),
            Self::DevEnumerate => Some(Self::DevResources),
            Self::DevResources => Some(Self::DevEnable),
            Self::DevEnable => Some(Self::DevInit),
            Self::DevInit => Some(Self::PostDevice),
            Self::PostDevice => Some(Self::OSResumeCheck),
            Self::OSResumeCheck if resume => Some(Self::OSResume),
            Self::OSResumeCheck => Some(Self::WriteTables),
            Self::WriteTables => Some(Self::PayloadLoad),
            Self::PayloadLoad => Some(Self::PayloadBoot),
            Self::OSResume | Self::PayloadBoot => None,
        }
    }
}

/// The boot_state_sequence_t describes when a callback is to be made. It is
/// called either before a state is entered or when a state is exited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootStateSequence {
    OnEntry,
    OnExit,
}

pub type BootStateFn<'a> = &'a mut (dyn FnMut() -> Result<(), CbErr> + 'a);

/// A callback bound to one edge of one boot state.
pub struct BootStateCallback<'a> {
    pub name: &'static str,
    pub state: BootState,
    pub seq: BootStateSequence,
    run: BootStateFn<'a>,
}

/// Fixed-capacity table of boot state callbacks.
///
/// Callbacks run in registration order. A failing callback is logged and does
/// not stop the ones after it; boot carries on the way coreboot does.
pub struct BootStateRegistry<'a, const N: usize> {
    callbacks: Vec<BootStateCallback<'a>, N>,
}

impl<'a, const N: usize> BootStateRegistry<'a, N> {
    pub const fn new() -> Self {
        Self { callbacks: Vec::new() }
    }

    pub fn register(
        &mut self,
        name: &'static str,
        state: BootState,
        seq: BootStateSequence,
        run: BootStateFn<'a>,
    ) -> Result<(), CbErr> {
        self.callbacks
            .push(BootStateCallback { name, state, seq, run })
            .map_err(|cb| {
                error!("boot state: no room to register {}", cb.name);
                CbErr::Err
            })
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs every callback registered for `state`/`seq` and returns how many
    /// of them failed.
    pub fn run(&mut self, state: BootState, seq: BootStateSequence) -> usize {
        let mut failed = 0;
        for cb in self
            .callbacks
            .iter_mut()
            .filter(|cb| cb.state == state && cb.seq == seq)
        {
            debug!("BS: {:?} {:?} running {}", state, seq, cb.name);
            if let Err(e) = (cb.run)() {
                error!("BS: {:?} {:?} {} failed: {}", state, seq, cb.name, e);
                failed += 1;
            }
        }
        failed
    }

    /// Walks the state machine from `PreDevice`, running entry and exit
    /// callbacks of every state. Returns the total number of failures.
    pub fn walk(&mut self, resume: bool) -> usize {
        let mut failed = 0;
        let mut state = Some(BootState::PreDevice);
        while let Some(s) = state {
            failed += self.run(s, BootStateSequence::OnEntry);
            failed += self.run(s, BootStateSequence::OnExit);
            state = s.next(resume);
        }
        failed
    }
}

impl<const N: usize> Default for BootStateRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
