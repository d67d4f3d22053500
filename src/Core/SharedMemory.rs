// Shared memory regions for Linux
// Named regions live in /dev/shm and are mapped with mmap(MAP_SHARED), so every
// process that opens the same key sees the same bytes.

use std::fmt;
use std::fs::OpenOptions;
use std::mem::{align_of, size_of};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// Directory backing POSIX shared memory objects.
const SHM_DIR: &str = "/dev/shm";

/// Prefix of every shm object this crate creates.
const SHM_PREFIX: &str = "station_ingest_";

/// Numeric name of a shared region.
///
/// Keys come from a process-wide integer space. This crate does not hand them
/// out: callers derive them (see [`BufferDescriptor`](crate::Structs::BufferDescriptor))
/// so that producer and consumers agree on a key without talking to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey(pub u32);

impl RegionKey {
    /// Name of the shm object backing this key.
    pub fn shm_name(&self) -> String {
        format!("{SHM_PREFIX}{:08x}", self.0)
    }

    /// Path of the shm object backing this key.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(SHM_DIR).join(self.shm_name())
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// How a region is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the region, reusing one that already exists at the key.
    Create,
    /// Create the region, failing if one already exists at the key.
    CreateExclusive,
    /// Attach to an existing region without write access.
    Read,
    /// Attach to an existing region with write access.
    ReadWrite,
}

impl OpenMode {
    pub fn creates(self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::CreateExclusive)
    }

    pub fn writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Marker for types that may be viewed in place inside a region.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (or primitive), valid for every bit
/// pattern, and only mutated through atomics once the region is shared.
pub unsafe trait RegionSafe {}

unsafe impl RegionSafe for AtomicU64 {}
unsafe impl RegionSafe for AtomicU32 {}

/// Sleep-based backoff used while polling for state owned by another process.
///
/// Starts at 100µs and doubles up to 10ms, never sleeping past the deadline.
pub(crate) struct PollBackoff {
    start: Instant,
    timeout: Duration,
    step: Duration,
}

impl PollBackoff {
    const FIRST_STEP: Duration = Duration::from_micros(100);
    const MAX_STEP: Duration = Duration::from_millis(10);

    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
            step: Self::FIRST_STEP,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Sleep for the next step. Returns false once the deadline has passed.
    pub(crate) fn snooze(&mut self) -> bool {
        let elapsed = self.start.elapsed();
        if elapsed >= self.timeout {
            return false;
        }
        let remaining = self.timeout - elapsed;
        thread::sleep(self.step.min(remaining));
        self.step = (self.step * 2).min(Self::MAX_STEP);
        true
    }
}

/// A mapped shared memory region.
///
/// The mapping address differs per process, so nothing outside this type
/// deals in addresses: access goes through byte offsets that are checked
/// against the mapped length.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    size: usize,
    key: RegionKey,
    mode: OpenMode,
    /// Owners unlink the shm object when dropped.
    owner: bool,
    /// The shm object existed (with a non-zero length) before a Create.
    preexisting: bool,
}

// Send + Sync: all shared mutation goes through atomics or the single writer.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Open the region named by `key`.
    ///
    /// `Create`/`CreateExclusive` size the region to `size` bytes and make the
    /// caller its owner. `Read`/`ReadWrite` attach to a region of at least
    /// `size` bytes, retrying while it does not exist yet until `timeout`
    /// elapses; that case ends in [`IngestError::RegionNotFound`]. Any other
    /// OS failure is returned at once.
    pub fn open(key: RegionKey, size: usize, mode: OpenMode, timeout: Duration) -> Result<Self> {
        if size == 0 {
            return Err(IngestError::InvalidConfig(
                "shared region size must be non-zero".into(),
            ));
        }
        match mode {
            OpenMode::Create | OpenMode::CreateExclusive => Self::create(key, size, mode),
            OpenMode::Read | OpenMode::ReadWrite => Self::attach(key, size, mode, timeout),
        }
    }

    #[cfg(target_os = "linux")]
    fn create(key: RegionKey, size: usize, mode: OpenMode) -> Result<Self> {
        let path = key.path();
        let mut options = OpenOptions::new();
        options.read(true).write(true).mode(0o600);
        if mode == OpenMode::CreateExclusive {
            options.create_new(true);
        } else {
            options.create(true);
        }

        let file = options.open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                IngestError::RegionExists(key)
            } else {
                IngestError::os(
                    format!("failed to create shared region {key} at {}", path.display()),
                    e,
                )
            }
        })?;

        let previous_len = file
            .metadata()
            .map_err(|e| IngestError::os(format!("failed to stat shared region {key}"), e))?
            .len();

        file.set_len(size as u64).map_err(|e| {
            IngestError::os(format!("failed to size shared region {key} to {size} bytes"), e)
        })?;

        let ptr = unsafe { map_file(file.as_raw_fd(), size, true, key)? };
        info!(%key, size, reused = previous_len > 0, "created shared region");

        Ok(Self {
            ptr,
            size,
            key,
            mode,
            owner: true,
            preexisting: previous_len > 0,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn create(_key: RegionKey, _size: usize, _mode: OpenMode) -> Result<Self> {
        Err(IngestError::Unsupported("named shared memory"))
    }

    fn attach(key: RegionKey, size: usize, mode: OpenMode, timeout: Duration) -> Result<Self> {
        let mut backoff = PollBackoff::new(timeout);
        loop {
            if let Some(region) = Self::try_attach(key, size, mode)? {
                debug!(%key, size = region.size, waited = ?backoff.elapsed(), "attached to shared region");
                return Ok(region);
            }
            if !backoff.snooze() {
                return Err(IngestError::RegionNotFound {
                    key,
                    waited: backoff.elapsed(),
                });
            }
        }
    }

    /// Single attach attempt. `Ok(None)` means the region does not exist yet
    /// (or exists but its creator has not sized it yet).
    #[cfg(target_os = "linux")]
    pub(crate) fn try_attach(key: RegionKey, min_size: usize, mode: OpenMode) -> Result<Option<Self>> {
        let path = key.path();
        let file = match OpenOptions::new()
            .read(true)
            .write(mode.writable())
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::os(
                    format!("failed to open shared region {key} at {}", path.display()),
                    e,
                ))
            }
        };

        let len = file
            .metadata()
            .map_err(|e| IngestError::os(format!("failed to stat shared region {key}"), e))?
            .len() as usize;
        if len == 0 {
            return Ok(None);
        }
        if len < min_size {
            return Err(IngestError::SizeMismatch {
                key,
                expected: min_size,
                actual: len,
            });
        }

        let ptr = unsafe { map_file(file.as_raw_fd(), len, mode.writable(), key)? };
        Ok(Some(Self {
            ptr,
            size: len,
            key,
            mode,
            owner: false,
            preexisting: true,
        }))
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn try_attach(_key: RegionKey, _min_size: usize, _mode: OpenMode) -> Result<Option<Self>> {
        Err(IngestError::Unsupported("named shared memory"))
    }

    /// Map an unnamed region visible only to this process (and its threads).
    ///
    /// Used when producer and consumers share an address space, and in tests.
    #[cfg(unix)]
    pub fn anonymous(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(IngestError::InvalidConfig(
                "shared region size must be non-zero".into(),
            ));
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(IngestError::os(
                format!("failed to map {size} anonymous bytes"),
                std::io::Error::last_os_error(),
            ));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            IngestError::os("mmap returned null", std::io::Error::last_os_error())
        })?;

        Ok(Self {
            ptr,
            size,
            key: RegionKey(0),
            mode: OpenMode::Create,
            owner: false,
            preexisting: false,
        })
    }

    /// Best-effort ceiling for a single region in bytes: the space still
    /// available on the shm filesystem. 0 when it cannot be determined.
    pub fn max_size() -> usize {
        #[cfg(target_os = "linux")]
        {
            let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
            let dir = b"/dev/shm\0";
            let rc = unsafe { libc::statvfs(dir.as_ptr() as *const libc::c_char, &mut stat) };
            if rc != 0 {
                return 0;
            }
            (stat.f_bavail as u64)
                .saturating_mul(stat.f_frsize as u64)
                .try_into()
                .unwrap_or(usize::MAX)
        }
        #[cfg(not(target_os = "linux"))]
        {
            0
        }
    }

    /// Remove the shm object now. Existing mappings stay valid until they are
    /// dropped; later attaches no longer find the key.
    pub fn unlink(&mut self) -> Result<()> {
        if !self.mode.creates() || self.key == RegionKey(0) {
            return Ok(());
        }
        self.owner = false;
        match std::fs::remove_file(self.key.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IngestError::os(
                format!("failed to unlink shared region {}", self.key),
                e,
            )),
        }
    }

    pub fn key(&self) -> RegionKey {
        self.key
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode.writable()
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// True when a `Create` found an existing region at the key.
    pub fn was_preexisting(&self) -> bool {
        self.preexisting
    }

    /// Stop unlinking the object on drop; somebody else tears it down.
    pub(crate) fn disown(&mut self) {
        self.owner = false;
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(IngestError::SizeMismatch {
                key: self.key,
                expected: offset.saturating_add(len),
                actual: self.size,
            }),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.writable() {
            Ok(())
        } else {
            Err(IngestError::ReadOnly(self.key))
        }
    }

    /// View a `T` living at `offset`. `None` when it would not fit or is misaligned.
    pub fn get<T: RegionSafe>(&self, offset: usize) -> Option<&T> {
        self.check_bounds(offset, size_of::<T>()).ok()?;
        let addr = unsafe { self.ptr.as_ptr().add(offset) };
        if (addr as usize) % align_of::<T>() != 0 {
            return None;
        }
        Some(unsafe { &*(addr as *const T) })
    }

    /// Write `value` at `offset`, bypassing any previous contents.
    ///
    /// Only for initialising a region before it is published as ready.
    pub(crate) fn init<T: RegionSafe>(&self, offset: usize, value: T) -> Result<()> {
        self.check_writable()?;
        self.check_bounds(offset, size_of::<T>())?;
        let addr = unsafe { self.ptr.as_ptr().add(offset) };
        if (addr as usize) % align_of::<T>() != 0 {
            return Err(IngestError::CorruptRegion(self.key));
        }
        unsafe { ptr::write(addr as *mut T, value) };
        Ok(())
    }

    /// Copy `src` into the region at `offset`.
    pub(crate) fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_bounds(offset, src.len())?;
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes out of the region starting at `offset`.
    pub(crate) fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, dst.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub(crate) fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

/// Whether a process with this pid still exists. A pid we may not signal
/// still counts as alive.
#[cfg(target_os = "linux")]
pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
unsafe fn map_file(fd: i32, len: usize, writable: bool, key: RegionKey) -> Result<NonNull<u8>> {
    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let ptr = libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0);
    if ptr == libc::MAP_FAILED {
        return Err(IngestError::os(
            format!("failed to map shared region {key} ({len} bytes)"),
            std::io::Error::last_os_error(),
        ));
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| {
        IngestError::os(
            format!("mmap returned null for shared region {key}"),
            std::io::Error::last_os_error(),
        )
    })
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
        if self.owner {
            match std::fs::remove_file(self.key.path()) {
                Ok(()) => debug!(key = %self.key, "unlinked shared region"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(key = %self.key, error = %e, "failed to unlink shared region"),
            }
        }
    }
}
