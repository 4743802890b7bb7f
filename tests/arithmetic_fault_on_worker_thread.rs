//! Without IEEE floats an arithmetic fault becomes an error of the running program, but only
//! when it happens on the main thread; anywhere else it is fatal. This installs process wide
//! signal handlers, so each case runs in a forked child and this is the only test in its binary.
use editor_sysdep::{
    system::{
        interface::{ProcessId, RealPlatform},
        retry::Interruptible,
        signal::{consts::SIGFPE, set_arithmetic_error_hook, SignalRegistry},
        wait::{wait_for_termination, WaitStatus},
    },
    Config,
};

const HOOK_RAN: libc::c_int = 42;
const THREAD_CONTINUED: libc::c_int = 3;
const SETUP_FAILED: libc::c_int = 5;

extern "C" fn arithmetic_error() -> ! {
    unsafe { libc::_exit(HOOK_RAN) }
}

fn run_child(on_worker: bool) -> WaitStatus {
    let pid = match unsafe { libc::fork() } {
        -1 => panic!("fork failed: {}", std::io::Error::last_os_error()),
        0 => child(on_worker),
        pid => ProcessId::new(pid),
    };

    wait_for_termination(&RealPlatform, pid, Interruptible::No).unwrap()
}

fn child(on_worker: bool) -> ! {
    let config = Config::default()
        .ieee_floating_point(false)
        .backtrace_limit(0);
    if SignalRegistry::install(&config).is_err() {
        unsafe { libc::_exit(SETUP_FAILED) };
    }
    set_arithmetic_error_hook(Some(arithmetic_error));

    if on_worker {
        let _ = std::thread::spawn(|| unsafe { libc::raise(SIGFPE) }).join();
    } else {
        unsafe { libc::raise(SIGFPE) };
    }
    unsafe { libc::_exit(THREAD_CONTINUED) }
}

#[test]
fn arithmetic_errors_are_raised_on_the_main_thread_only() {
    let status = run_child(false);
    assert_eq!(status.exit_status(), Some(HOOK_RAN), "{status:?}");

    let status = run_child(true);
    assert_eq!(status.exit_status(), None, "{status:?}");
    assert_eq!(status.term_signal(), Some(SIGFPE));
}
