// Readiness bitmasks, modeled on poll(2)'s events/revents fields.
use bitflags::bitflags;

bitflags! {
    /// What a caller is asking to be woken up for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interest: i16 {
        const READABLE = libc::POLLIN as i16;
        const WRITABLE = libc::POLLOUT as i16;
    }
}

bitflags! {
    /// What poll(2) actually reported. May include bits the caller never
    /// asked for: the kernel sets POLLERR/POLLHUP/POLLNVAL unconditionally.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Events: i16 {
        const READABLE = libc::POLLIN as i16;
        const WRITABLE = libc::POLLOUT as i16;
        const ERROR = libc::POLLERR as i16;
        const HANGUP = libc::POLLHUP as i16;
        const INVALID = libc::POLLNVAL as i16;
    }
}

impl Interest {
    pub(crate) fn as_poll_events(self) -> libc::c_short {
        self.bits() as libc::c_short
    }
}

impl Events {
    pub(crate) fn from_revents(revents: libc::c_short) -> Events {
        Events::from_bits_truncate(revents as i16)
    }
}
