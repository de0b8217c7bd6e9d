//! Memory samplers
//!
//! A [`Sampler`] is the only thing the monitor engine knows about measuring memory. The engine calls it once per
//! cycle and consumes the returned [`MemorySnapshot`]; how the numbers are obtained is up to the implementation.
//!
//! With the `system` feature enabled two platform-backed samplers are available:
//!
//! - [`SystemSampler`] reports host-wide memory (`/proc/meminfo` on Linux, `sysctl` + mach VM statistics on macOS)
//! - [`ProcessSampler`] reports the resident set size of the current process against a fixed budget

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::memory::types::MemorySnapshot;

/// Source of memory snapshots
#[cfg_attr(test, automock)]
pub trait Sampler: Send + Sync {
    /// Take one point-in-time measurement
    fn measure(&self) -> Result<MemorySnapshot>;

    /// Ask the host to give back reclaimable memory before the next measurement.
    ///
    /// The default implementation does nothing.
    fn reclaim(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "system")]
pub use platform::{ProcessSampler, SystemSampler};

#[cfg(feature = "system")]
mod platform {
    use super::Sampler;
    use crate::error::{Error, Result};
    use crate::memory::types::MemorySnapshot;

    /// Host-wide memory sampler
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemSampler;

    impl SystemSampler {
        pub fn new() -> Self {
            Self
        }
    }

    impl Sampler for SystemSampler {
        fn measure(&self) -> Result<MemorySnapshot> {
            let (total, available) = host_memory()?;
            Ok(MemorySnapshot::new(total.saturating_sub(available), available, total))
        }

        fn reclaim(&self) -> Result<()> {
            release_free_heap();
            Ok(())
        }
    }

    /// Samples the resident set size of the current process against a byte budget.
    ///
    /// `used` is the current RSS, `max` the budget and `available` whatever is left of the budget (never negative).
    #[derive(Debug, Clone, Copy)]
    pub struct ProcessSampler {
        budget: u64,
    }

    impl ProcessSampler {
        /// Creates a sampler measuring against `budget` bytes
        pub fn with_budget(budget: u64) -> Result<Self> {
            if budget == 0 {
                return Err(Error::invalid_argument("Process memory budget must be positive", budget));
            }
            Ok(Self { budget })
        }

        pub fn budget(&self) -> u64 {
            self.budget
        }
    }

    impl Sampler for ProcessSampler {
        fn measure(&self) -> Result<MemorySnapshot> {
            let rss = process_rss()?;
            Ok(MemorySnapshot::new(rss, self.budget.saturating_sub(rss), self.budget))
        }

        fn reclaim(&self) -> Result<()> {
            release_free_heap();
            Ok(())
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn release_free_heap() {
        // SAFETY: malloc_trim only walks allocator-owned free lists.
        unsafe {
            libc::malloc_trim(0);
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn release_free_heap() {}

    #[cfg(target_os = "linux")]
    fn host_memory() -> Result<(u64, u64)> {
        let meminfo = std::fs::read_to_string("/proc/meminfo")?;
        super::parse_meminfo(&meminfo)
    }

    #[cfg(target_os = "linux")]
    fn process_rss() -> Result<u64> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        super::parse_vm_rss(&status)
    }

    #[cfg(target_os = "macos")]
    fn host_memory() -> Result<(u64, u64)> {
        let total = mach::total_memory()?;
        let vmstat = mach::vm_statistics()?;
        let page_size = mach::page_size();
        let available = (vmstat.free_count as u64 + vmstat.inactive_count as u64) * page_size;
        Ok((total, available.min(total)))
    }

    #[cfg(target_os = "macos")]
    fn process_rss() -> Result<u64> {
        Err(Error::not_available("process RSS sampling is only implemented on Linux"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn host_memory() -> Result<(u64, u64)> {
        Err(Error::not_available("host memory sampling is not supported on this platform"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn process_rss() -> Result<u64> {
        Err(Error::not_available("process RSS sampling is not supported on this platform"))
    }

    #[cfg(target_os = "macos")]
    mod mach {
        use crate::error::{Error, Result};

        const KERN_SUCCESS: i32 = 0;
        const HOST_VM_INFO64: i32 = 4;
        const HOST_VM_INFO64_COUNT: u32 = 38;

        type HostInfoT = *mut i32;
        type MachPortT = u32;

        #[repr(C)]
        #[derive(Debug, Default)]
        #[allow(dead_code)]
        pub(super) struct VmStatistics64 {
            pub free_count: u32,
            pub active_count: u32,
            pub inactive_count: u32,
            pub wire_count: u32,
            zero_fill_count: u64,
            reactivations: u64,
            pageins: u64,
            pageouts: u64,
            faults: u64,
            cow_faults: u64,
            lookups: u64,
            hits: u64,
            purges: u64,
            purgeable_count: u32,
            speculative_count: u32,
            decompressions: u64,
            compressions: u64,
            swapins: u64,
            swapouts: u64,
            compressor_page_count: u32,
            throttled_count: u32,
            external_page_count: u32,
            internal_page_count: u32,
            total_uncompressed_pages_in_compressor: u64,
        }

        extern "C" {
            static vm_kernel_page_size: usize;

            fn host_statistics64(
                host_priv: MachPortT,
                flavor: i32,
                host_info_out: HostInfoT,
                host_info_out_cnt: *mut u32,
            ) -> i32;

            fn mach_host_self() -> MachPortT;
        }

        pub(super) fn total_memory() -> Result<u64> {
            let mut size = 0u64;
            let mut size_len = std::mem::size_of::<u64>();
            let mut mib = [libc::CTL_HW, libc::HW_MEMSIZE];

            // SAFETY: `size` is a u64 and `size_len` reports its exact size.
            let result = unsafe {
                libc::sysctl(
                    mib.as_mut_ptr(),
                    mib.len() as u32,
                    &mut size as *mut u64 as *mut libc::c_void,
                    &mut size_len,
                    std::ptr::null_mut(),
                    0,
                )
            };

            if result == 0 {
                Ok(size)
            } else {
                Err(Error::sampling(format!("Failed to get total memory: {}", result)))
            }
        }

        pub(super) fn page_size() -> u64 {
            // SAFETY: read-only kernel constant exported by libsystem.
            unsafe { vm_kernel_page_size as u64 }
        }

        pub(super) fn vm_statistics() -> Result<VmStatistics64> {
            let mut info = VmStatistics64::default();
            let mut count = HOST_VM_INFO64_COUNT;

            // SAFETY: `info` matches the layout of vm_statistics64_data_t and `count` its size in integers.
            let kern_result = unsafe {
                host_statistics64(
                    mach_host_self(),
                    HOST_VM_INFO64,
                    (&mut info as *mut VmStatistics64) as HostInfoT,
                    &mut count,
                )
            };

            if kern_result != KERN_SUCCESS {
                return Err(Error::sampling(format!("Failed to get VM statistics: {}", kern_result)));
            }

            Ok(info)
        }
    }
}

/// Extracts `(total, available)` bytes from `/proc/meminfo` contents.
///
/// Kernels older than 3.14 lack `MemAvailable`; there the estimate falls back to `MemFree + Buffers + Cached`.
#[cfg(feature = "system")]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_meminfo(contents: &str) -> Result<(u64, u64)> {
    use crate::error::Error;

    let mut total = None;
    let mut available = None;
    let mut fallback = 0u64;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let field = match key.trim() {
            "MemTotal" => &mut total,
            "MemAvailable" => &mut available,
            "MemFree" | "Buffers" | "Cached" => {
                fallback = fallback.saturating_add(parse_kib(rest)?);
                continue;
            },
            _ => continue,
        };
        *field = Some(parse_kib(rest)?);
    }

    let total = total.ok_or_else(|| Error::invalid_data("MemTotal missing from /proc/meminfo"))?;
    let available = available.unwrap_or(fallback).min(total);
    Ok((total, available))
}

/// Extracts the resident set size in bytes from `/proc/self/status` contents
#[cfg(feature = "system")]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_vm_rss(contents: &str) -> Result<u64> {
    use crate::error::Error;

    contents
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("VmRSS:"))
        .ok_or_else(|| Error::invalid_data("VmRSS missing from /proc/self/status"))
        .and_then(parse_kib)
}

#[cfg(feature = "system")]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_kib(value: &str) -> Result<u64> {
    use crate::error::Error;
    use crate::memory::constants::KIB;

    let mut parts = value.split_whitespace();
    let number = parts.next().ok_or_else(|| Error::invalid_data("empty /proc value"))?;
    let kib = number
        .parse::<u64>()
        .map_err(|e| Error::invalid_data(format!("invalid /proc value {:?}: {}", number, e)))?;
    match parts.next() {
        None | Some("kB") => Ok(kib.saturating_mul(KIB)),
        Some(unit) => Err(Error::invalid_data(format!("unexpected unit {:?} in /proc value", unit))),
    }
}

#[cfg(all(test, feature = "system"))]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16318756 kB\n\
                           MemFree:          812340 kB\n\
                           MemAvailable:    8159378 kB\n\
                           Buffers:          402112 kB\n\
                           Cached:          6120004 kB\n\
                           HugePages_Total:       0\n";

    #[test]
    fn test_parse_meminfo() {
        let (total, available) = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(total, 16318756 * 1024);
        assert_eq!(available, 8159378 * 1024);
    }

    #[test]
    fn test_parse_meminfo_without_mem_available() {
        let legacy = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 250 kB\n";
        let (total, available) = parse_meminfo(legacy).unwrap();
        assert_eq!(total, 1000 * 1024);
        assert_eq!(available, 400 * 1024);
    }

    #[test]
    fn test_parse_meminfo_rejects_garbage() {
        assert!(parse_meminfo("MemFree: 10 kB\n").is_err());
        assert!(parse_meminfo("MemTotal: lots kB\n").is_err());
        assert!(parse_meminfo("MemTotal: 10 MB\n").is_err());
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tmemwatch\nVmPeak:\t  20000 kB\nVmRSS:\t   12345 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status).unwrap(), 12345 * 1024);
        assert!(parse_vm_rss("Name:\tmemwatch\n").is_err());
    }

    #[test]
    fn test_process_sampler_rejects_zero_budget() {
        assert!(ProcessSampler::with_budget(0).is_err());
        assert_eq!(ProcessSampler::with_budget(4096).unwrap().budget(), 4096);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_sampler_reports_sane_values() {
        let snapshot = SystemSampler::new().measure().unwrap();
        assert!(snapshot.max > 0);
        assert!(snapshot.available <= snapshot.max);
        assert!((0.0..=1.0).contains(&snapshot.available_ratio()));
        assert!(SystemSampler::new().reclaim().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_sampler_reports_rss() {
        let sampler = ProcessSampler::with_budget(u64::MAX).unwrap();
        let snapshot = sampler.measure().unwrap();
        assert!(snapshot.used > 0);
        assert_eq!(snapshot.max, u64::MAX);
        assert_eq!(snapshot.available, u64::MAX - snapshot.used);
    }
}
