//! Job control: owning the terminal's foreground while we edit on it.
use std::os::fd::RawFd;

use crate::{
    common::Error,
    log::{dev_info, dev_warn},
    system::{
        interface::{Platform, ProcessId},
        retry::retry_io,
    },
};

/// The process group we were started in and whether we moved out of it.
///
/// A process that was started as part of someone else's group (for instance `cmd | editor`)
/// moves to a group of its own while it uses the terminal, so that the keyboard signals it
/// turns on do not reach the rest of that group. A process that already leads its own group
/// has nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForegroundGroup {
    inherited: Option<ProcessId>,
    narrowed: bool,
}

impl ForegroundGroup {
    /// Look at the group we are in.
    pub fn init<P: Platform>(platform: &P) -> Self {
        let pgrp = platform.process_group();
        let inherited = (pgrp != platform.process_id()).then_some(pgrp);
        if let Some(pgrp) = inherited {
            dev_info!("started in process group {pgrp}");
        }

        Self {
            inherited,
            narrowed: false,
        }
    }

    /// The group we were started in, `None` if we lead our own.
    pub fn inherited(&self) -> Option<ProcessId> {
        self.inherited
    }

    pub fn is_narrowed(&self) -> bool {
        self.narrowed
    }

    /// Move to a group of our own and make it the foreground group of the terminal on `fd`.
    ///
    /// Once we have left the inherited group we count as narrowed, even if the terminal could
    /// not be handed over; [`widen`](Self::widen) then still takes us back.
    pub fn narrow<P: Platform>(&mut self, platform: &P, fd: RawFd) -> Result<(), Error> {
        if self.inherited.is_none() || self.narrowed {
            return Ok(());
        }

        let own = ProcessId::new(0);
        retry_io(|| platform.set_process_group(own, own))?;
        self.narrowed = true;

        let pid = platform.process_id();
        if let Err(err) = retry_io(|| platform.set_foreground_process_group(fd, pid)) {
            dev_warn!("cannot make group {pid} the foreground of fd {fd}: {err}");
        }
        Ok(())
    }

    /// Go back to the group we were started in and give it the terminal on `fd` again.
    pub fn widen<P: Platform>(&mut self, platform: &P, fd: RawFd) -> Result<(), Error> {
        let Some(inherited) = self.inherited else {
            return Ok(());
        };
        if !self.narrowed {
            return Ok(());
        }

        retry_io(|| platform.set_process_group(ProcessId::new(0), inherited))?;
        self.narrowed = false;

        if let Err(err) = retry_io(|| platform.set_foreground_process_group(fd, inherited)) {
            dev_warn!("cannot give fd {fd} back to group {inherited}: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{
        fake::{Call, FakePlatform},
        term::mode::TerminalMode,
    };
    use pretty_assertions::assert_eq;

    fn terminal() -> TerminalMode {
        TerminalMode::from_raw(unsafe { std::mem::zeroed() })
    }

    #[test]
    fn group_leader_never_touches_the_terminal() {
        let platform = FakePlatform::new();
        platform.add_terminal(0, terminal(), ProcessId::new(100));
        let mut group = ForegroundGroup::init(&platform);
        assert_eq!(group.inherited(), None);

        group.narrow(&platform, 0).unwrap();
        group.narrow(&platform, 0).unwrap();
        group.widen(&platform, 0).unwrap();
        assert!(!group.is_narrowed());
        assert_eq!(platform.calls(), vec![]);
    }

    #[test]
    fn narrow_and_widen_in_an_inherited_group() {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        platform.add_terminal(0, terminal(), shell);
        let mut group = ForegroundGroup::init(&platform);
        assert_eq!(group.inherited(), Some(shell));

        // widening before narrowing changes nothing
        group.widen(&platform, 0).unwrap();
        assert_eq!(platform.calls(), vec![]);

        platform.interrupt_next(1);
        group.narrow(&platform, 0).unwrap();
        assert!(group.is_narrowed());
        assert_eq!(platform.group(), us);
        assert_eq!(platform.foreground(0), Some(us));

        platform.clear_calls();
        group.narrow(&platform, 0).unwrap();
        assert_eq!(platform.calls(), vec![]);

        group.widen(&platform, 0).unwrap();
        assert!(!group.is_narrowed());
        assert_eq!(platform.group(), shell);
        assert_eq!(platform.foreground(0), Some(shell));
        assert_eq!(
            platform.calls(),
            vec![
                Call::SetProcessGroup(ProcessId::new(0), shell),
                Call::SetForeground(0, shell),
            ]
        );
    }

    #[test]
    fn terminal_failures_do_not_strand_us_in_our_own_group() {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        let mut group = ForegroundGroup::init(&platform);

        // no terminal on fd 5, but the group change itself works
        group.narrow(&platform, 5).unwrap();
        assert!(group.is_narrowed());
        assert_eq!(platform.group(), us);

        group.widen(&platform, 5).unwrap();
        assert!(!group.is_narrowed());
        assert_eq!(platform.group(), shell);
    }

    #[test]
    fn refused_group_change_leaves_the_terminal_alone() {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        platform.add_terminal(0, terminal(), shell);
        let mut group = ForegroundGroup::init(&platform);

        platform.refuse_group_changes(true);
        let err = group.narrow(&platform, 0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
        assert!(!group.is_narrowed());
        assert_eq!(platform.group(), shell);
        assert_eq!(platform.foreground(0), Some(shell));

        platform.refuse_group_changes(false);
        group.narrow(&platform, 0).unwrap();
        platform.refuse_group_changes(true);
        assert!(group.widen(&platform, 0).is_err());
        // still narrowed, so a later widen can finish the job
        assert!(group.is_narrowed());
        platform.refuse_group_changes(false);
        group.widen(&platform, 0).unwrap();
        assert_eq!(platform.group(), shell);
        assert_eq!(platform.foreground(0), Some(shell));
    }
}
