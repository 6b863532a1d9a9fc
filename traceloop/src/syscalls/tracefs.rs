//! Syscall declarations from tracefs
//!
//! Each `events/syscalls/sys_enter_<name>/format` file lists the tracepoint
//! fields; everything after `__syscall_nr` is a syscall parameter:
//!
//! ```text
//! name: sys_enter_openat
//! ID: 633
//! format:
//!     field:unsigned short common_type;    offset:0;    size:2;    signed:0;
//!     ...
//!     field:int __syscall_nr;              offset:8;    size:4;    signed:1;
//!     field:int dfd;                       offset:16;   size:8;    signed:0;
//!     field:const char * filename;         offset:24;   size:8;    signed:0;
//! ```

use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::SyscallDeclaration;

/// Usual tracefs mount point
pub const DEFAULT_TRACEFS_ROOT: &str = "/sys/kernel/tracing";

const ENTER_PREFIX: &str = "sys_enter_";

/// Directory holding the syscall tracepoints under a tracefs mount
#[must_use]
pub fn syscalls_dir(root: &Path) -> PathBuf {
    root.join("events").join("syscalls")
}

/// Read every `sys_enter_*` declaration under `root`
///
/// Individual unreadable or malformed format files are skipped.
///
/// # Errors
///
/// Returns an error if the syscalls event directory cannot be listed.
pub fn read_declarations(root: &Path) -> io::Result<Vec<SyscallDeclaration>> {
    let mut declarations = Vec::new();

    for entry in fs::read_dir(syscalls_dir(root))? {
        let entry = entry?;
        let dir_name = entry.file_name();
        let Some(name) = dir_name.to_str().and_then(|n| n.strip_prefix(ENTER_PREFIX)) else {
            continue;
        };

        let format_path = entry.path().join("format");
        match fs::read_to_string(&format_path) {
            Ok(content) => match parse_format(name, &content) {
                Some(decl) => declarations.push(decl),
                None => debug!("No parameter block in {}", format_path.display()),
            },
            Err(e) => debug!("Skipping {}: {e}", format_path.display()),
        }
    }

    Ok(declarations)
}

/// Parse one tracepoint format file into a declaration
///
/// Returns `None` if the file has no `__syscall_nr` field.
#[must_use]
pub fn parse_format(name: &str, content: &str) -> Option<SyscallDeclaration> {
    let mut fields = content.lines().filter_map(field_name);

    fields.by_ref().find(|f| *f == "__syscall_nr")?;
    let params = fields.map(str::to_string).collect();

    Some(SyscallDeclaration::new(name, params))
}

/// Field name of a `field:<type> <name>;` line
fn field_name(line: &str) -> Option<&str> {
    let decl = line.trim().strip_prefix("field:")?;
    let decl = decl.split(';').next()?;
    let last = decl.rsplit([' ', '*']).next()?;
    // Array fields look like `char comm[16]`
    let name = last.split('[').next()?;
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENAT_FORMAT: &str = "name: sys_enter_openat
ID: 633
format:
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;

\tfield:int __syscall_nr;\toffset:8;\tsize:4;\tsigned:1;
\tfield:int dfd;\toffset:16;\tsize:8;\tsigned:0;
\tfield:const char * filename;\toffset:24;\tsize:8;\tsigned:0;
\tfield:int flags;\toffset:32;\tsize:8;\tsigned:0;
\tfield:umode_t mode;\toffset:40;\tsize:8;\tsigned:0;

print fmt: \"dfd: 0x%08lx, filename: 0x%08lx, flags: 0x%08lx, mode: 0x%08lx\"
";

    #[test]
    fn test_parse_openat_format() {
        let decl = parse_format("openat", OPENAT_FORMAT).unwrap();
        assert_eq!(decl.name(), "openat");
        assert_eq!(decl.parameters(), ["dfd", "filename", "flags", "mode"]);
    }

    #[test]
    fn test_parse_format_without_params() {
        let content = "format:\n\tfield:int __syscall_nr;\toffset:8;\tsize:4;\tsigned:1;\n";
        let decl = parse_format("getpid", content).unwrap();
        assert_eq!(decl.parameter_count(), 0);
    }

    #[test]
    fn test_parse_format_without_syscall_nr() {
        assert!(parse_format("bogus", "format:\n\tfield:int x;\n").is_none());
    }

    #[test]
    fn test_field_name_variants() {
        assert_eq!(field_name("\tfield:const char *const * argv;\toffset:24;"), Some("argv"));
        assert_eq!(field_name("\tfield:char comm[16];\toffset:8;"), Some("comm"));
        assert_eq!(field_name("print fmt: \"x\""), None);
    }

    #[test]
    fn test_read_declarations_from_tree() {
        let root = tempfile::tempdir().unwrap();
        let openat = syscalls_dir(root.path()).join("sys_enter_openat");
        fs::create_dir_all(&openat).unwrap();
        fs::write(openat.join("format"), OPENAT_FORMAT).unwrap();

        // Exit tracepoints and non-tracepoint entries are ignored
        let exit = syscalls_dir(root.path()).join("sys_exit_openat");
        fs::create_dir_all(&exit).unwrap();
        fs::write(exit.join("format"), OPENAT_FORMAT).unwrap();
        fs::write(syscalls_dir(root.path()).join("enable"), "0\n").unwrap();

        // Missing format file is skipped
        fs::create_dir_all(syscalls_dir(root.path()).join("sys_enter_broken")).unwrap();

        let decls = read_declarations(root.path()).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name(), "openat");
    }

    #[test]
    fn test_read_declarations_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(read_declarations(&root.path().join("absent")).is_err());
    }
}
