/// Identity of the calling thread, used as lock owner.
pub(crate) fn current_owner() -> String {
    format!("{}:{:?}", std::process::id(), std::thread::current().id())
}

/// Check whether a process with the given PID is still running.
#[cfg(unix)]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    // 0 and values that wrap to negative pids address process groups.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // kill(pid, 0) checks existence without sending a signal. EPERM means
    // the process exists but belongs to someone else.
    let rc = unsafe { libc::kill(pid as i32, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    const PROCESS_QUERY_LIMITED_INFORMATION: u32 = 0x1000;
    const STILL_ACTIVE: u32 = 259;

    unsafe extern "system" {
        fn OpenProcess(access: u32, inherit: i32, pid: u32) -> *mut core::ffi::c_void;
        fn CloseHandle(handle: *mut core::ffi::c_void) -> i32;
        fn GetExitCodeProcess(handle: *mut core::ffi::c_void, code: *mut u32) -> i32;
    }

    if pid == 0 {
        return false;
    }

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }

        let mut exit_code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);

        ok != 0 && exit_code == STILL_ACTIVE
    }
}

/// Without a liveness check every holder is presumed alive; stale-age
/// recovery still applies.
#[cfg(not(any(unix, windows)))]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_unlikely_pid_is_dead() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(i32::MAX as u32));
    }

    #[test]
    fn test_owner_includes_pid() {
        assert!(current_owner().starts_with(&format!("{}:", std::process::id())));
    }
}
