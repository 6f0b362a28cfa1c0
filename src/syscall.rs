// This module contains the interface to unsafe system calls.
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, RawFd};

fn result(val: isize) -> io::Result<usize> {
    match val {
        -1 => Err(std::io::Error::last_os_error()),
        v => Ok(v as usize),
    }
}

// Run poll(2). EINTR is folded into "zero events" here so callers don't each
// have to special-case a signal interrupting the wait.
pub fn poll(pollfds: &mut [libc::pollfd], timeout: i32) -> io::Result<usize> {

    // The types are the same, so the try_into().unwrap() should get optimized out.
    let timeout: libc::c_int = timeout.try_into().unwrap();
    let nfds = pollfds.len() as libc::nfds_t;

    // SAFETY: very basic linux system call.
    let res = unsafe {
        libc::poll(pollfds.as_mut_ptr(), nfds, timeout)
    };
    if res < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(res as usize)
}

fn non_blocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: very basic linux system calls, no pointers.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// Both ends are made non-blocking: the waker writes a single byte from
// arbitrary threads and must never block on a full pipe.
pub fn pipe() -> io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: very basic linux system call.
    let res = unsafe {
        libc::pipe(fds.as_mut_ptr())
    };
    result(res as isize)?;
    non_blocking(fds[0])?;
    non_blocking(fds[1])?;
    // SAFETY: constructing a File from fds we just opened and own exclusively.
    let files = unsafe {
        (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]))
    };
    Ok(files)
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: very basic linux system call.
    let res = unsafe {
        libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len() as libc::size_t)
    };
    result(res)
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: very basic linux system call.
    let res = unsafe {
        libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len() as libc::size_t)
    };
    result(res)
}
