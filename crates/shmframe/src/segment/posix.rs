//! POSIX shared-memory objects.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

use super::Backend;
use crate::error::ShmError;

/// `shm_open` + `mmap` backend.
///
/// Names live in a flat namespace: one leading `/`, then ASCII alphanumerics
/// only, which is what every POSIX system accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixShm;

// SAFETY: `create` and `open` return the address of a live `MAP_SHARED`
// read-write mapping of `size` bytes, unmapped only by `release`.
unsafe impl Backend for PosixShm {
    type Handle = OwnedFd;

    fn os_name(name: &str) -> io::Result<String> {
        let body: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
        if body.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment name has no alphanumeric characters",
            ));
        }
        Ok(format!("/{body}"))
    }

    fn create(os_name: &str, size: usize) -> Result<(NonNull<u8>, OwnedFd), ShmError> {
        let c_name = c_name(os_name).map_err(|e| ShmError::creation(os_name, e))?;
        let len = libc::off_t::try_from(size).map_err(|_| {
            ShmError::creation(
                os_name,
                io::Error::new(io::ErrorKind::InvalidInput, "segment size exceeds off_t"),
            )
        })?;

        // Objects outlive the process that made them, and some systems refuse
        // to ftruncate an existing one, so clear any leftover first.
        // SAFETY: c_name is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ShmError::creation(os_name, err));
            }
        }

        // SAFETY: c_name is a valid NUL-terminated string.
        let raw = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(ShmError::creation(os_name, io::Error::last_os_error()));
        }
        // SAFETY: shm_open succeeded, we own the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mapped = (|| {
            // The only way to size a fresh POSIX shared-memory object.
            // SAFETY: fd is open for writing.
            if unsafe { libc::ftruncate(fd.as_raw_fd(), len) } != 0 {
                return Err(io::Error::last_os_error());
            }
            map(&fd, size)
        })();

        match mapped {
            Ok(data) => Ok((data, fd)),
            Err(err) => {
                drop(fd);
                // SAFETY: c_name is a valid NUL-terminated string.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                Err(ShmError::creation(os_name, err))
            }
        }
    }

    fn open(os_name: &str, size: usize) -> Result<(NonNull<u8>, OwnedFd), ShmError> {
        let c_name = c_name(os_name).map_err(|e| ShmError::opening(os_name, e))?;

        // Read-write: the consumer clears the status byte after reading.
        // SAFETY: c_name is a valid NUL-terminated string.
        let raw = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if raw < 0 {
            return Err(ShmError::opening(os_name, io::Error::last_os_error()));
        }
        // SAFETY: shm_open succeeded, we own the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // Touching pages past the end of the object raises SIGBUS, so refuse
        // to map more than the producer allocated.
        let actual = object_len(&fd).map_err(|e| ShmError::mapping(os_name, e))?;
        if actual < size {
            return Err(ShmError::mapping(
                os_name,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment holds {actual} bytes, expected at least {size}"),
                ),
            ));
        }

        let data = map(&fd, size).map_err(|e| ShmError::mapping(os_name, e))?;
        Ok((data, fd))
    }

    unsafe fn release(
        os_name: &str,
        data: NonNull<u8>,
        size: usize,
        handle: OwnedFd,
        unlink: bool,
    ) {
        // SAFETY: caller guarantees data/size describe a live mapping.
        if unsafe { libc::munmap(data.as_ptr().cast(), size) } != 0 {
            tracing::warn!(name = %os_name, "munmap failed: {}", io::Error::last_os_error());
        }

        drop(handle);

        if unlink {
            let Ok(c_name) = c_name(os_name) else {
                return;
            };
            // SAFETY: c_name is a valid NUL-terminated string.
            if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    tracing::warn!(name = %os_name, "shm_unlink failed: {}", err);
                }
            }
        }
    }
}

fn c_name(os_name: &str) -> io::Result<CString> {
    CString::new(os_name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn map(fd: &OwnedFd, size: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: fd is a valid shared-memory descriptor; the kernel validates
    // the length.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

fn object_len(fd: &OwnedFd) -> io::Result<usize> {
    // SAFETY: an all-zero stat is a valid out-parameter.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is valid, st is writable.
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(st.st_size).unwrap_or(0))
}
