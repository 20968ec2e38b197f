//! Pagefile-backed file mappings.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingA, MapViewOfFile, OpenFileMappingA, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};

use super::Backend;
use crate::error::ShmError;

/// `CreateFileMappingA` + `MapViewOfFile` backend.
///
/// Names are used verbatim. The OS removes a mapping object when its last
/// handle closes, so there is nothing to unlink.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsMapping;

// SAFETY: `create` and `open` return the base of a read-write view of at
// least `size` bytes, unmapped only by `release`.
unsafe impl Backend for WindowsMapping {
    type Handle = HANDLE;

    fn os_name(name: &str) -> io::Result<String> {
        if name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment name is empty",
            ));
        }
        Ok(name.to_owned())
    }

    fn create(os_name: &str, size: usize) -> Result<(NonNull<u8>, HANDLE), ShmError> {
        let c_name = c_name(os_name).map_err(|e| ShmError::creation(os_name, e))?;
        let size64 = size as u64;

        // SAFETY: c_name is NUL-terminated; INVALID_HANDLE_VALUE selects the
        // paging file.
        let handle = unsafe {
            CreateFileMappingA(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                (size64 >> 32) as u32,
                size64 as u32,
                c_name.as_ptr().cast(),
            )
        };
        if handle == 0 {
            return Err(ShmError::creation(os_name, io::Error::last_os_error()));
        }
        // SAFETY: reads thread-local error state only.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // A live process still holds the old object; it cannot be removed
            // from here, so it is reused as is.
            tracing::warn!(name = %os_name, "file mapping already exists, reusing it");
        }

        match map(handle, size) {
            Ok(data) => Ok((data, handle)),
            Err(err) => {
                // SAFETY: handle came from CreateFileMappingA above.
                unsafe { CloseHandle(handle) };
                Err(ShmError::creation(os_name, err))
            }
        }
    }

    fn open(os_name: &str, size: usize) -> Result<(NonNull<u8>, HANDLE), ShmError> {
        let c_name = c_name(os_name).map_err(|e| ShmError::opening(os_name, e))?;

        // SAFETY: c_name is NUL-terminated.
        let handle = unsafe { OpenFileMappingA(FILE_MAP_ALL_ACCESS, 0, c_name.as_ptr().cast()) };
        if handle == 0 {
            return Err(ShmError::opening(os_name, io::Error::last_os_error()));
        }

        match map(handle, size) {
            Ok(data) => Ok((data, handle)),
            Err(err) => {
                // SAFETY: handle came from OpenFileMappingA above.
                unsafe { CloseHandle(handle) };
                Err(ShmError::mapping(os_name, err))
            }
        }
    }

    unsafe fn release(
        os_name: &str,
        data: NonNull<u8>,
        _size: usize,
        handle: HANDLE,
        _unlink: bool,
    ) {
        let view = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: data.as_ptr().cast(),
        };
        // SAFETY: caller guarantees `data` is a live view.
        if unsafe { UnmapViewOfFile(view) } == 0 {
            let err = io::Error::last_os_error();
            tracing::warn!(name = %os_name, "UnmapViewOfFile failed: {}", err);
        }
        // SAFETY: caller guarantees `handle` is open and owned.
        if unsafe { CloseHandle(handle) } == 0 {
            let err = io::Error::last_os_error();
            tracing::warn!(name = %os_name, "CloseHandle failed: {}", err);
        }
    }
}

fn c_name(os_name: &str) -> io::Result<CString> {
    CString::new(os_name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn map(handle: HANDLE, size: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: handle is a valid file-mapping handle.
    let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
    NonNull::new(view.Value.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_verbatim() {
        assert_eq!(WindowsMapping::os_name("123-osr").unwrap(), "123-osr");
        let local = WindowsMapping::os_name("Local\\frames").unwrap();
        assert_eq!(local, "Local\\frames");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(WindowsMapping::os_name("").is_err());
    }
}
