//! Named shared-memory segments.
//!
//! A [`SharedSegment`] owns exactly one OS mapping. It exists only in the
//! mapped state: [`SharedSegment::create`] and [`SharedSegment::open`] perform
//! the OS calls, and the single teardown path (drop or [`SharedSegment::close`])
//! unmaps, releases the handle and, for the creator, removes the name.
//!
//! The OS primitive is chosen at compile time through [`Backend`]:
//!
//! - unix: POSIX shared-memory objects (`shm_open` + `mmap`)
//! - windows: pagefile-backed file mappings (`CreateFileMappingA` + `MapViewOfFile`)
//!
//! ```text
//!  producer                         consumer
//!  SharedSegment::create(name) ──┐
//!                                ├── same OS object ── SharedSegment::open(name)
//!  drop → unmap, close, unlink ──┘                      drop → unmap, close
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::ShmError;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use posix::PosixShm;
#[cfg(windows)]
pub use windows::WindowsMapping;

/// The backend compiled for this target.
#[cfg(unix)]
pub type PlatformBackend = PosixShm;
/// The backend compiled for this target.
#[cfg(windows)]
pub type PlatformBackend = WindowsMapping;

#[cfg(not(any(unix, windows)))]
compile_error!("shmframe supports unix-like systems and Windows only.");

/// An OS shared-memory primitive.
///
/// Implementations perform the raw OS calls; [`SharedSegment`] owns the result
/// and guarantees `release` runs exactly once per successful `create`/`open`.
///
/// # Safety
///
/// A successful `create(_, size)` or `open(_, size)` must return a pointer to
/// `size` bytes that are readable and writable, and that stay valid until
/// `release` is called with that pointer. [`SharedSegment`] hands out slices
/// over those bytes without further checks.
///
/// A backend that cannot promise this does not compile without `unsafe`:
///
/// ```compile_fail,E0200
/// use std::ptr::NonNull;
///
/// use shmframe::segment::Backend;
/// use shmframe::ShmError;
///
/// struct Dangling;
///
/// impl Backend for Dangling {
///     type Handle = ();
///
///     fn os_name(name: &str) -> std::io::Result<String> {
///         Ok(name.to_owned())
///     }
///
///     fn create(_: &str, _: usize) -> Result<(NonNull<u8>, ()), ShmError> {
///         Ok((NonNull::dangling(), ()))
///     }
///
///     fn open(_: &str, _: usize) -> Result<(NonNull<u8>, ()), ShmError> {
///         Ok((NonNull::dangling(), ()))
///     }
///
///     unsafe fn release(_: &str, _: NonNull<u8>, _: usize, _: (), _: bool) {}
/// }
/// ```
pub unsafe trait Backend {
    /// Platform handle kept alive for the lifetime of the mapping.
    type Handle;

    /// Turn a caller-supplied name into the name used in the OS namespace.
    fn os_name(name: &str) -> std::io::Result<String>;

    /// Create (replacing any stale object of the same name) and map `size`
    /// bytes read-write. On failure nothing named is left behind.
    fn create(os_name: &str, size: usize) -> Result<(NonNull<u8>, Self::Handle), ShmError>;

    /// Attach to an existing object and map `size` bytes read-write.
    fn open(os_name: &str, size: usize) -> Result<(NonNull<u8>, Self::Handle), ShmError>;

    /// Unmap, close the handle and, if `unlink`, remove the name.
    ///
    /// Never fails: problems are logged and swallowed.
    ///
    /// # Safety
    ///
    /// `data`, `size` and `handle` must come from one successful `create` or
    /// `open` call, and nothing may access `data` afterwards.
    unsafe fn release(
        os_name: &str,
        data: NonNull<u8>,
        size: usize,
        handle: Self::Handle,
        unlink: bool,
    );
}

/// One named OS shared-memory mapping.
///
/// Move-only. The creator removes the name from the OS namespace when the
/// segment is torn down; an opener only unmaps and closes its handle.
pub struct SharedSegment<B: Backend = PlatformBackend> {
    name: String,
    size: usize,
    data: NonNull<u8>,
    /// `None` once torn down.
    handle: Option<B::Handle>,
    owner: bool,
    _backend: PhantomData<B>,
}

// SAFETY: the segment exclusively owns its mapping; the raw pointer is only
// dereferenced through `&self`/`&mut self`.
unsafe impl<B: Backend> Send for SharedSegment<B> where B::Handle: Send {}

impl<B: Backend> SharedSegment<B> {
    /// Create a new named segment of exactly `size` bytes, mapped read-write.
    ///
    /// A stale object with the same name, left over from an earlier process,
    /// is removed first.
    pub fn create(name: &str, size: usize) -> Result<Self, ShmError> {
        let os_name = B::os_name(name).map_err(|e| ShmError::creation(name, e))?;
        let (data, handle) = B::create(&os_name, size)?;

        tracing::debug!(name = %os_name, size, "created shared memory segment");

        Ok(Self {
            name: os_name,
            size,
            data,
            handle: Some(handle),
            owner: true,
            _backend: PhantomData,
        })
    }

    /// Attach to an existing segment assumed to hold at least `size` bytes.
    pub fn open(name: &str, size: usize) -> Result<Self, ShmError> {
        let os_name = B::os_name(name).map_err(|e| ShmError::opening(name, e))?;
        let (data, handle) = B::open(&os_name, size)?;

        tracing::debug!(name = %os_name, size, "opened shared memory segment");

        Ok(Self {
            name: os_name,
            size,
            data,
            handle: Some(handle),
            owner: false,
            _backend: PhantomData,
        })
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Name of the segment in the OS namespace.
    ///
    /// This is the string to hand to the consumer process.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment (and will unlink it).
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Base address of the mapping.
    ///
    /// Other processes may write through their own mappings at any time.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// View the mapping as bytes.
    ///
    /// The slice reflects memory shared with other processes; its contents may
    /// change underneath it when a peer writes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` maps `size` bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.size) }
    }

    /// Mutable view of the mapping.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `data` maps `size` bytes for as long as `self` lives, and
        // `&mut self` rules out other views in this process.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.size) }
    }

    /// Tear the segment down now.
    ///
    /// Equivalent to dropping it.
    pub fn close(self) {
        drop(self);
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(
                name = %self.name,
                owner = self.owner,
                "releasing shared memory segment"
            );
            // SAFETY: the handle was taken, so this runs once, and no view of
            // `data` can outlive `self`.
            unsafe { B::release(&self.name, self.data, self.size, handle, self.owner) };
        }
    }
}

impl<B: Backend> Drop for SharedSegment<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<B: Backend> fmt::Debug for SharedSegment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShmStatus;

    type Segment = SharedSegment<PlatformBackend>;

    fn unique(tag: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static NEXT: AtomicU32 = AtomicU32::new(0);
        format!(
            "shmframe{tag}{}x{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn create_then_open_share_bytes() {
        let name = unique("share");
        let mut producer = Segment::create(&name, 64).unwrap();
        let mut consumer = Segment::open(producer.name(), 64).unwrap();

        assert!(producer.is_owner());
        assert!(!consumer.is_owner());
        assert_eq!(producer.size(), 64);
        assert_eq!(consumer.size(), 64);

        producer.as_mut_slice()[3] = 0x42;
        assert_eq!(consumer.as_slice()[3], 0x42);

        consumer.as_mut_slice()[63] = 0x17;
        assert_eq!(producer.as_slice()[63], 0x17);
    }

    #[test]
    fn fresh_segment_is_zeroed() {
        let name = unique("zero");
        let segment = Segment::create(&name, 128).unwrap();
        assert!(segment.as_slice().iter().all(|&b| b == 0));
    }

    // Windows keeps a mapping alive only while a handle is open, so there is
    // no stale object to replace there.
    #[cfg(unix)]
    #[test]
    fn create_replaces_stale_segment() {
        let name = unique("stale");
        let first = Segment::create(&name, 32).unwrap();
        // Simulate a leftover from a crashed process: the name is still live.
        std::mem::forget(first);

        let second = Segment::create(&name, 96).unwrap();
        assert_eq!(second.size(), 96);
    }

    #[test]
    fn open_missing_segment_fails() {
        let name = unique("missing");
        let err = Segment::open(&name, 16).unwrap_err();
        assert_eq!(err.status(), ShmStatus::OpeningFailed);
    }

    #[test]
    fn owner_teardown_removes_name() {
        let name = unique("unlink");
        let segment = Segment::create(&name, 16).unwrap();
        let os_name = segment.name().to_owned();
        segment.close();

        let err = Segment::open(&os_name, 16).unwrap_err();
        assert_eq!(err.status(), ShmStatus::OpeningFailed);
    }

    #[test]
    fn opener_teardown_keeps_name() {
        let name = unique("keep");
        let producer = Segment::create(&name, 16).unwrap();
        let consumer = Segment::open(producer.name(), 16).unwrap();
        drop(consumer);

        let again = Segment::open(producer.name(), 16);
        assert!(again.is_ok());
    }

    #[test]
    fn failed_creation_leaves_nothing_behind() {
        let name = unique("empty");
        // Zero-length mappings are rejected by the OS after the object exists.
        let err = Segment::create(&name, 0).unwrap_err();
        assert_eq!(err.status(), ShmStatus::CreationFailed);

        let err = Segment::open(&name, 16).unwrap_err();
        assert_eq!(err.status(), ShmStatus::OpeningFailed);
    }

    /// Process-private memory standing in for an OS mapping.
    struct Heap;

    // SAFETY: the pointer addresses the boxed slice held as the handle, which
    // lives until `release` drops it. Moving the box does not move the bytes.
    unsafe impl Backend for Heap {
        type Handle = Box<[u8]>;

        fn os_name(name: &str) -> std::io::Result<String> {
            Ok(name.to_owned())
        }

        fn create(_: &str, size: usize) -> Result<(NonNull<u8>, Box<[u8]>), ShmError> {
            let mut bytes = vec![0u8; size].into_boxed_slice();
            let data = NonNull::new(bytes.as_mut_ptr()).unwrap_or(NonNull::dangling());
            Ok((data, bytes))
        }

        fn open(os_name: &str, _: usize) -> Result<(NonNull<u8>, Box<[u8]>), ShmError> {
            Err(ShmError::opening(
                os_name,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ))
        }

        unsafe fn release(_: &str, _: NonNull<u8>, _: usize, handle: Box<[u8]>, _: bool) {
            drop(handle);
        }
    }

    #[test]
    fn custom_backend_backs_the_views() {
        let mut segment = SharedSegment::<Heap>::create("heap", 32).unwrap();
        assert!(segment.as_slice().iter().all(|&b| b == 0));

        segment.as_mut_slice()[31] = 0x99;
        assert_eq!(segment.as_slice()[31], 0x99);
        assert_eq!(segment.size(), 32);
        segment.close();

        let err = SharedSegment::<Heap>::open("heap", 32).unwrap_err();
        assert_eq!(err.status(), ShmStatus::OpeningFailed);
    }

    #[test]
    fn debug_omits_pointer() {
        let name = unique("debug");
        let segment = Segment::create(&name, 8).unwrap();
        let out = format!("{segment:?}");
        assert!(out.contains("SharedSegment"));
        assert!(out.contains("size: 8"));
    }
}
