/// Ask the allocator to return freed memory to the OS.
///
/// On glibc targets this calls `malloc_trim(0)` and reports whether the
/// allocator said it released anything. Elsewhere it is a no-op that reports
/// `false`. Best-effort only; the caller cannot assume RSS moved.
pub fn force_reclaim() -> bool {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: malloc_trim has no preconditions and touches no Rust-visible
        // state; it only walks glibc's own arenas.
        let released = unsafe { libc::malloc_trim(0) };
        if released != 0 {
            tracing::debug!(target = "keel.memory", "malloc_trim released memory to the OS");
        }
        released != 0
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        false
    }
}
