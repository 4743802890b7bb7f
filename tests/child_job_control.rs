use std::process::Command;

use editor_sysdep::system::{
    interface::{ProcessId, RealPlatform},
    kill,
    retry::Interruptible,
    signal::consts::{SIGCONT, SIGKILL, SIGSTOP},
    wait::{poll_child_status, wait_for_termination, PendingChildStatus, WaitOptions},
};

#[test]
fn stopped_and_continued_child_has_nothing_to_report() {
    let child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = ProcessId::new(child.id() as libc::pid_t);

    kill(pid, SIGSTOP).unwrap();
    kill(pid, SIGCONT).unwrap();
    assert_eq!(
        poll_child_status(&RealPlatform, pid, WaitOptions::new()).unwrap(),
        PendingChildStatus::NotYet
    );

    kill(pid, SIGKILL).unwrap();
    let status = wait_for_termination(&RealPlatform, pid, Interruptible::No).unwrap();
    assert_eq!(status.term_signal(), Some(SIGKILL));

    // the child is gone, so there is nothing left to reap
    assert!(poll_child_status(&RealPlatform, pid, WaitOptions::new()).is_err());
}
