/// Returns true if a process with the given pid is currently running.
///
/// Signal 0 performs the permission and existence checks without delivering
/// anything, so this works on processes we did not spawn.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    // Non-unix builds only ever ask about themselves.
    pid == std::process::id()
}
