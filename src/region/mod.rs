//! Backing shared-memory segment: the contiguous region every attached
//! process maps, holding the [`RegionHeader`] (inter-process ref count +
//! registry mutex) followed by the fixed [`RegistryEntry`] array.

pub(crate) mod mutex;

use std::ffi::CString;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::now_micros;
use crate::config::{RegionConfig, MAX_WINDOWS};
use crate::error::{StatError, StatResult};
use crate::registry::{self, RegistryEntry};
use mutex::RawProcessMutex;

const MAGIC: u64 = 0x5354_4154_424C_4B31; // "STATBLK1"

/// Layout of the shared segment. `#[repr(C)]`, placed at offset 0.
#[repr(C)]
pub struct RegionHeader {
    magic: AtomicU64,
    /// Two-level reference count's global half: number of processes
    /// currently attached (`G` in the module contract). Stored inside the
    /// region itself — the design note this corrects is storing this count
    /// behind an external named semaphore instead, which cannot distinguish
    /// "count is zero" from "someone is about to re-attach".
    ref_count: AtomicU64,
    registry_mutex: RawProcessMutex,
    next_free: AtomicU32,
    entries: [RegistryEntry; MAX_WINDOWS],
}

impl RegionHeader {
    fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }
}

/// A live attachment to the backing region.
///
/// Dropping the last `Region` handle in a process does *not* by itself
/// detach — detach/destroy is driven explicitly by
/// [`crate::lifecycle::LifecycleManager`], which tracks per-process user
/// count separately from this type's lifetime (a `Region` may be cloned via
/// `Arc` and shared by many `Facade` instances in one process).
pub struct Region {
    base: *mut u8,
    len: usize,
    config: RegionConfig,
}

// SAFETY: `base` points at shared memory; all access to its contents goes
// through atomics and the in-region process-shared mutex.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn header(&self) -> &RegionHeader {
        // SAFETY: `base` is a valid mapping of at least `size_of::<RegionHeader>()`
        // bytes, checked at attach time, and outlives `self`.
        unsafe { &*(self.base as *const RegionHeader) }
    }

    /// Attach to the named segment, creating it if this is the first
    /// process to ever touch it. Increments the region's process count.
    pub fn attach(config: &RegionConfig) -> StatResult<Self> {
        let header_size = std::mem::size_of::<RegionHeader>();
        if header_size > config.segment_size {
            return Err(StatError::Poisoned(
                "RegionConfig::segment_size is smaller than RegionHeader",
            ));
        }

        let c_name = shm_path(&config.segment_name);
        let (fd, created) = open_or_create(&c_name)?;

        // SAFETY: `fd` is a valid, open file descriptor for the shared
        // segment for the remainder of this scope.
        if created {
            unsafe {
                if libc::ftruncate(fd, config.segment_size as libc::off_t) != 0 {
                    libc::close(fd);
                    let _ = libc::shm_unlink(c_name.as_ptr());
                    return Err(StatError::RegionAttach {
                        name: config.segment_name.clone(),
                        source: std::io::Error::last_os_error(),
                    });
                }
            }
        }

        let base = mmap_segment(fd, config.segment_size, &config.segment_name)?;
        // SAFETY: close the fd; the mapping keeps the segment alive.
        unsafe {
            libc::close(fd);
        }

        let region = Region {
            base,
            len: config.segment_size,
            config: config.clone(),
        };

        if created {
            region.init_as_creator()?;
        } else {
            region.wait_for_creator()?;
        }

        {
            // Guarded by the same registry_mutex `detach` uses to decrement
            // and check `ref_count`, per spec's "the named cross-process
            // mutex guards all transitions of both U and G": without this,
            // a concurrent detacher could observe `ref_count == 0` and
            // unlink the segment while this attach's increment is still in
            // flight, orphaning this process on an already-removed name.
            let _guard = region.header().registry_mutex.lock();
            region.header().ref_count.fetch_add(1, Ordering::AcqRel);
        }
        tracing::debug!(
            segment = %config.segment_name,
            created,
            "attached to stat region"
        );
        Ok(region)
    }

    /// Initialize a brand-new segment. Only the creator calls this, before
    /// publishing `magic` — every later attacher waits for `magic` to appear
    /// (see `wait_for_creator`) and so never races this initialization.
    fn init_as_creator(&self) -> StatResult<()> {
        let header = self.header();
        // SAFETY: no other process can observe this segment yet (`magic`
        // is still zero); this is the single allowed initialization.
        unsafe {
            header.registry_mutex.init_in_place()?;
        }
        header.ref_count.store(0, Ordering::Relaxed);
        header.next_free.store(0, Ordering::Relaxed);
        header.magic.store(MAGIC, Ordering::Release);
        Ok(())
    }

    /// A joiner spins briefly until the creator has finished
    /// `init_as_creator` and published `magic`.
    fn wait_for_creator(&self) -> StatResult<()> {
        let header = self.header();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while header.magic.load(Ordering::Acquire) != MAGIC {
            if std::time::Instant::now() > deadline {
                return Err(StatError::RegionAttach {
                    name: self.config.segment_name.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "timed out waiting for region creator to finish initializing",
                    ),
                });
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Find or create the named window, returning its registry index.
    pub fn find_or_create(&self, name: &str, interval_us: u64) -> StatResult<u32> {
        let header = self.header();
        let _guard = header.registry_mutex.lock();
        registry::find_or_create(
            header.entries(),
            &header.next_free,
            name,
            interval_us,
            now_micros(),
        )
    }

    /// Resolve a registry index back to its `Window`, or `None` if out of
    /// range (which should not happen for a handle this `Region` produced).
    pub fn window(&self, index: u32) -> Option<&crate::window::Window> {
        self.header()
            .entries()
            .get(index as usize)
            .map(|e| &e.window)
    }

    /// Decrement the region's process count. If this was the last attached
    /// process, unlink the backing segment (other processes, if any,
    /// already have their own mapping and are unaffected).
    ///
    /// Takes `&self` rather than consuming `self`: callers may hold this
    /// `Region` behind an `Arc` shared with in-flight window operations, so
    /// unmapping happens separately, whenever the last such reference is
    /// actually dropped (see `Region`'s `Drop` impl), not necessarily at
    /// the end of this call.
    pub fn detach(&self) {
        let header = self.header();
        let last;
        {
            let _guard = header.registry_mutex.lock();
            let remaining = header.ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
            last = remaining == 0;
        }
        if last {
            let c_name = shm_path(&self.config.segment_name);
            // SAFETY: `c_name` is a valid NUL-terminated path.
            unsafe {
                let _ = libc::shm_unlink(c_name.as_ptr());
            }
            tracing::debug!(segment = %self.config.segment_name, "last process detached, region removed");
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe exactly the mapping created in `attach`.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

fn shm_path(name: &str) -> CString {
    let path = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(path).expect("segment name must not contain NUL bytes")
}

/// Returns `(fd, created)`. `created` is true only for the process that won
/// the `O_CREAT | O_EXCL` race.
fn open_or_create(c_name: &CString) -> StatResult<(libc::c_int, bool)> {
    // SAFETY: `c_name` is a valid NUL-terminated string; the returned `fd`
    // is owned by the caller.
    unsafe {
        let exclusive_fd = libc::shm_open(
            c_name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600,
        );
        if exclusive_fd >= 0 {
            return Ok((exclusive_fd, true));
        }
        if std::io::Error::last_os_error().raw_os_error() != Some(libc::EEXIST) {
            return Err(StatError::RegionAttach {
                name: c_name.to_string_lossy().into_owned(),
                source: std::io::Error::last_os_error(),
            });
        }
        let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600);
        if fd < 0 {
            return Err(StatError::RegionAttach {
                name: c_name.to_string_lossy().into_owned(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok((fd, false))
    }
}

fn mmap_segment(fd: libc::c_int, size: usize, name: &str) -> StatResult<*mut u8> {
    // SAFETY: `fd` is a valid, appropriately-sized shared-memory descriptor.
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(StatError::RegionAttach {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(ptr as *mut u8)
    }
}
