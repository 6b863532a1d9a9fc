//! Syscall numbering and compiled-in parameter names
//!
//! Numbers come from the `syscalls` crate tables for each architecture.
//! Parameter names follow the kernel's `sys_enter_*` tracepoint formats so
//! that the builtin table and a tracefs-loaded one agree.

use syscalls::{aarch64, x86_64};

/// Syscall numbers above this are not looked up
const NUMBER_LIMIT: u16 = 1024;

/// Syscall numbering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Numbering used by the running kernel
    ///
    /// Targets other than aarch64 use the x86_64 numbering.
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else {
            Arch::X86_64
        }
    }

    /// Name of syscall `nr` in this numbering
    #[must_use]
    pub fn syscall_name(self, nr: u16) -> Option<&'static str> {
        let nr = usize::from(nr);
        match self {
            Arch::X86_64 => x86_64::Sysno::new(nr).map(|s| s.name()),
            Arch::Aarch64 => aarch64::Sysno::new(nr).map(|s| s.name()),
        }
    }

    /// Every syscall this numbering defines, by ascending number
    pub fn syscalls(self) -> impl Iterator<Item = (u16, &'static str)> {
        (0..NUMBER_LIMIT).filter_map(move |nr| self.syscall_name(nr).map(|name| (nr, name)))
    }
}

/// Parameter names of the syscalls worth showing without tracefs
///
/// Syscalls missing here get an empty declaration from the builtin table.
#[rustfmt::skip]
pub(crate) static PARAMETER_NAMES: &[(&str, &[&str])] = &[
    ("accept",            &["fd", "upeer_sockaddr", "upeer_addrlen"]),
    ("accept4",           &["fd", "upeer_sockaddr", "upeer_addrlen", "flags"]),
    ("access",            &["filename", "mode"]),
    ("bind",              &["fd", "umyaddr", "addrlen"]),
    ("brk",               &["brk"]),
    ("capget",            &["header", "dataptr"]),
    ("chdir",             &["filename"]),
    ("chmod",             &["filename", "mode"]),
    ("clock_gettime",     &["which_clock", "tp"]),
    ("clock_nanosleep",   &["which_clock", "flags", "rqtp", "rmtp"]),
    ("clone",             &["clone_flags", "newsp", "parent_tidptr", "child_tidptr", "tls"]),
    ("clone3",            &["uargs", "size"]),
    ("close",             &["fd"]),
    ("close_range",       &["fd", "max_fd", "flags"]),
    ("connect",           &["fd", "uservaddr", "addrlen"]),
    ("dup",               &["fildes"]),
    ("dup2",              &["oldfd", "newfd"]),
    ("dup3",              &["oldfd", "newfd", "flags"]),
    ("epoll_create1",     &["flags"]),
    ("epoll_ctl",         &["epfd", "op", "fd", "event"]),
    ("epoll_pwait",       &["epfd", "events", "maxevents", "timeout_msecs", "sigmask", "sigsetsize"]),
    ("epoll_wait",        &["epfd", "events", "maxevents", "timeout"]),
    ("eventfd2",          &["count", "flags"]),
    ("execve",            &["filename", "argv", "envp"]),
    ("exit",              &["error_code"]),
    ("exit_group",        &["error_code"]),
    ("faccessat",         &["dfd", "filename", "mode"]),
    ("faccessat2",        &["dfd", "filename", "mode", "flags"]),
    ("fchdir",            &["fd"]),
    ("fchmod",            &["fd", "mode"]),
    ("fchown",            &["fd", "user", "group"]),
    ("fcntl",             &["fd", "cmd", "arg"]),
    ("fgetxattr",         &["fd", "name", "value", "size"]),
    ("fork",              &[]),
    ("fstat",             &["fd", "statbuf"]),
    ("fsync",             &["fd"]),
    ("ftruncate",         &["fd", "length"]),
    ("futex",             &["uaddr", "op", "val", "utime", "uaddr2", "val3"]),
    ("getcwd",            &["buf", "size"]),
    ("getdents64",        &["fd", "dirent", "count"]),
    ("geteuid",           &[]),
    ("getgid",            &[]),
    ("getpeername",       &["fd", "usockaddr", "usockaddr_len"]),
    ("getpid",            &[]),
    ("getppid",           &[]),
    ("getrandom",         &["buf", "count", "flags"]),
    ("getrlimit",         &["resource", "rlim"]),
    ("getsockname",       &["fd", "usockaddr", "usockaddr_len"]),
    ("getsockopt",        &["fd", "level", "optname", "optval", "optlen"]),
    ("gettid",            &[]),
    ("getuid",            &[]),
    ("getxattr",          &["pathname", "name", "value", "size"]),
    ("ioctl",             &["fd", "cmd", "arg"]),
    ("kill",              &["pid", "sig"]),
    ("lgetxattr",         &["pathname", "name", "value", "size"]),
    ("listen",            &["fd", "backlog"]),
    ("lseek",             &["fd", "offset", "whence"]),
    ("lstat",             &["filename", "statbuf"]),
    ("madvise",           &["start", "len_in", "behavior"]),
    ("memfd_create",      &["uname", "flags"]),
    ("mkdir",             &["pathname", "mode"]),
    ("mkdirat",           &["dfd", "pathname", "mode"]),
    ("mmap",              &["addr", "len", "prot", "flags", "fd", "off"]),
    ("mount",             &["dev_name", "dir_name", "type", "flags", "data"]),
    ("mprotect",          &["start", "len", "prot"]),
    ("munmap",            &["addr", "len"]),
    ("nanosleep",         &["rqtp", "rmtp"]),
    ("newfstatat",        &["dfd", "filename", "statbuf", "flag"]),
    ("open",              &["filename", "flags", "mode"]),
    ("openat",            &["dfd", "filename", "flags", "mode"]),
    ("openat2",           &["dfd", "filename", "how", "usize"]),
    ("pipe",              &["fildes"]),
    ("pipe2",             &["fildes", "flags"]),
    ("pivot_root",        &["new_root", "put_old"]),
    ("poll",              &["ufds", "nfds", "timeout_msecs"]),
    ("ppoll",             &["ufds", "nfds", "tsp", "sigmask", "sigsetsize"]),
    ("prctl",             &["option", "arg2", "arg3", "arg4", "arg5"]),
    ("pread64",           &["fd", "buf", "count", "pos"]),
    ("prlimit64",         &["pid", "resource", "new_rlim", "old_rlim"]),
    ("pselect6",          &["n", "inp", "outp", "exp", "tsp", "sig"]),
    ("pwrite64",          &["fd", "buf", "count", "pos"]),
    ("read",              &["fd", "buf", "count"]),
    ("readlink",          &["path", "buf", "bufsiz"]),
    ("readlinkat",        &["dfd", "pathname", "buf", "bufsiz"]),
    ("readv",             &["fd", "vec", "vlen"]),
    ("recvfrom",          &["fd", "ubuf", "size", "flags", "addr", "addr_len"]),
    ("recvmsg",           &["fd", "msg", "flags"]),
    ("rename",            &["oldname", "newname"]),
    ("renameat2",         &["olddfd", "oldname", "newdfd", "newname", "flags"]),
    ("rmdir",             &["pathname"]),
    ("rseq",              &["rseq", "rseq_len", "flags", "sig"]),
    ("rt_sigaction",      &["sig", "act", "oact", "sigsetsize"]),
    ("rt_sigprocmask",    &["how", "nset", "oset", "sigsetsize"]),
    ("rt_sigreturn",      &[]),
    ("sched_getaffinity", &["pid", "len", "user_mask_ptr"]),
    ("sched_yield",       &[]),
    ("sendmsg",           &["fd", "msg", "flags"]),
    ("sendto",            &["fd", "buff", "len", "flags", "addr", "addr_len"]),
    ("set_robust_list",   &["head", "len"]),
    ("set_tid_address",   &["tidptr"]),
    ("sethostname",       &["name", "len"]),
    ("setns",             &["fd", "flags"]),
    ("setsockopt",        &["fd", "level", "optname", "optval", "optlen"]),
    ("shutdown",          &["fd", "how"]),
    ("sigaltstack",       &["uss", "uoss"]),
    ("socket",            &["family", "type", "protocol"]),
    ("stat",              &["filename", "statbuf"]),
    ("statfs",            &["pathname", "buf"]),
    ("statx",             &["dfd", "filename", "flags", "mask", "buffer"]),
    ("sysinfo",           &["info"]),
    ("tgkill",            &["tgid", "pid", "sig"]),
    ("umask",             &["mask"]),
    ("umount2",           &["name", "flags"]),
    ("uname",             &["name"]),
    ("unlink",            &["pathname"]),
    ("unlinkat",          &["dfd", "pathname", "flag"]),
    ("unshare",           &["unshare_flags"]),
    ("vfork",             &[]),
    ("wait4",             &["upid", "stat_addr", "options", "ru"]),
    ("write",             &["fd", "buf", "count"]),
    ("writev",            &["fd", "vec", "vlen"]),
];

/// Compiled-in parameter names of `name`
pub(crate) fn parameter_names(name: &str) -> Option<&'static [&'static str]> {
    PARAMETER_NAMES.iter().find(|(n, _)| *n == name).map(|(_, params)| *params)
}
