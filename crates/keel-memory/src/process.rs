use crate::sample::{MemoryReading, MemorySource};

#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
struct ProcStatus {
    vm_rss: Option<u64>,
    vm_data: Option<u64>,
}

#[cfg(target_os = "linux")]
fn read_proc_status() -> Option<ProcStatus> {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => status,
        Err(err) => {
            // `/proc` may not be available in some sandboxed environments; treat it as
            // best-effort and only log unexpected filesystem errors.
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "keel.memory",
                    error = %err,
                    "failed to read /proc/self/status while sampling memory"
                );
            }
            return None;
        }
    };

    let mut parsed = ProcStatus::default();
    for line in status.lines() {
        let line = line.trim_start();
        let (field, slot) = if let Some(rest) = line.strip_prefix("VmRSS:") {
            (rest, &mut parsed.vm_rss)
        } else if let Some(rest) = line.strip_prefix("VmData:") {
            (rest, &mut parsed.vm_data)
        } else {
            continue;
        };
        let Some(kb) = field.split_whitespace().next() else {
            continue;
        };
        match kb.parse::<u64>() {
            Ok(kb) => *slot = Some(kb.saturating_mul(1024)),
            Err(err) => {
                // These are expected to be numeric values in kB; log once if parsing
                // fails to avoid spamming in hot call sites.
                static REPORTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
                if REPORTED.set(()).is_ok() {
                    tracing::debug!(
                        target = "keel.memory",
                        value = kb,
                        error = %err,
                        "failed to parse memory field from /proc/self/status"
                    );
                }
            }
        }
    }
    Some(parsed)
}

/// OS-reported resident set size of the current process.
pub fn current_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        read_proc_status().and_then(|status| status.vm_rss)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Total physical memory on this machine, when detectable.
pub fn system_memory_bytes() -> Option<u64> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total = system.total_memory();
    (total > 0).then_some(total)
}

/// [`MemorySource`] backed by `/proc/self/status`.
///
/// `heap_used` is approximated by the data segment size (`VmData`), `rss` by
/// `VmRSS`. `heap_total` is fixed at construction, defaulting to the detected
/// system total so classification against absolute thresholds stays
/// meaningful even without an allocator hook.
#[derive(Debug, Clone)]
pub struct ProcSource {
    heap_total: u64,
}

impl ProcSource {
    pub fn new() -> Self {
        Self {
            heap_total: system_memory_bytes().unwrap_or(0),
        }
    }

    pub fn with_heap_total(heap_total: u64) -> Self {
        Self { heap_total }
    }
}

impl Default for ProcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for ProcSource {
    fn sample(&mut self) -> Option<MemoryReading> {
        #[cfg(target_os = "linux")]
        {
            let status = read_proc_status()?;
            let rss = status.vm_rss?;
            Some(MemoryReading {
                heap_used: status.vm_data.unwrap_or(rss),
                heap_total: self.heap_total,
                rss,
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}
