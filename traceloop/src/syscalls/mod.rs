//! # Syscall Metadata
//!
//! Maps syscall numbers to names and names to parameter declarations, and
//! produces the parameter probe definitions installed in the kernel program.
//!
//! A [`SyscallTable`] is built once, either from the compiled-in table
//! ([`SyscallTable::builtin`]) or with declarations read from tracefs layered
//! on top ([`SyscallTable::load`]), and then shared read-only through an
//! `Arc`. [`SyscallTable::host`] gives a lazily initialised process-wide
//! instance.

pub mod probes;
pub mod table;
pub mod tracefs;

use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::domain::LookupError;
pub use probes::ParameterProbe;
pub use table::Arch;

/// Names and order of a syscall's parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallDeclaration {
    name: String,
    params: Vec<String>,
}

impl SyscallDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self { name: name.into(), params }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Name of the parameter at `index`
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownParameter`] if `index` is past the last
    /// parameter.
    pub fn parameter_name(&self, index: usize) -> Result<&str, LookupError> {
        self.params.get(index).map(String::as_str).ok_or_else(|| {
            LookupError::UnknownParameter { syscall: self.name.clone(), index }
        })
    }

    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.params
    }
}

/// Bidirectional syscall name/number table with parameter declarations
#[derive(Debug, Clone)]
pub struct SyscallTable {
    arch: Arch,
    names: HashMap<u16, String>,
    numbers: HashMap<String, u16>,
    declarations: HashMap<String, SyscallDeclaration>,
}

static HOST_TABLE: OnceLock<Arc<SyscallTable>> = OnceLock::new();

impl SyscallTable {
    /// Compiled-in table for the host architecture
    #[must_use]
    pub fn builtin() -> Self {
        Self::builtin_for(Arch::host())
    }

    /// Compiled-in table for `arch`
    ///
    /// Every syscall of the numbering gets a declaration; those without
    /// compiled-in parameter names declare no parameters.
    #[must_use]
    pub fn builtin_for(arch: Arch) -> Self {
        let mut names = HashMap::new();
        let mut numbers = HashMap::new();
        let mut declarations = HashMap::new();

        for (nr, name) in arch.syscalls() {
            let params = table::parameter_names(name)
                .map(|params| params.iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            names.insert(nr, name.to_string());
            numbers.insert(name.to_string(), nr);
            declarations.insert(name.to_string(), SyscallDeclaration::new(name, params));
        }

        Self { arch, names, numbers, declarations }
    }

    /// Builtin table with the kernel's tracepoint declarations layered on top
    ///
    /// An unreadable tracefs is not an error: the builtin declarations stay.
    #[must_use]
    pub fn load(tracefs_root: &Path) -> Self {
        let mut table = Self::builtin();

        match tracefs::read_declarations(tracefs_root) {
            Ok(decls) => {
                info!(
                    "Loaded {} syscall declarations from {}",
                    decls.len(),
                    tracefs_root.display()
                );
                for decl in decls {
                    table.declarations.insert(decl.name().to_string(), decl);
                }
            }
            Err(e) => {
                debug!("Using builtin syscall declarations ({}: {e})", tracefs_root.display());
            }
        }

        table
    }

    /// Process-wide table, initialised on first use
    ///
    /// Reads declarations from [`tracefs::DEFAULT_TRACEFS_ROOT`] when
    /// available.
    pub fn host() -> Arc<SyscallTable> {
        Arc::clone(HOST_TABLE.get_or_init(|| {
            Arc::new(Self::load(Path::new(tracefs::DEFAULT_TRACEFS_ROOT)))
        }))
    }

    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// # Errors
    ///
    /// Returns [`LookupError::UnknownSyscall`] if `id` is not in the table.
    pub fn name_for_number(&self, id: u16) -> Result<&str, LookupError> {
        self.names.get(&id).map(String::as_str).ok_or(LookupError::UnknownSyscall(id))
    }

    #[must_use]
    pub fn number_for_name(&self, name: &str) -> Option<u16> {
        self.numbers.get(name).copied()
    }

    /// # Errors
    ///
    /// Returns [`LookupError::UnknownDeclaration`] if no declaration is known
    /// for `name`.
    pub fn declaration_for(&self, name: &str) -> Result<&SyscallDeclaration, LookupError> {
        self.declarations
            .get(name)
            .ok_or_else(|| LookupError::UnknownDeclaration(name.to_string()))
    }

    /// Parameter probe definitions for every probed syscall this table numbers
    ///
    /// Probed syscalls that do not exist in this numbering (e.g. `open` on
    /// aarch64) are skipped.
    #[must_use]
    pub fn parameter_probes(&self) -> Vec<ParameterProbe> {
        let mut out = Vec::with_capacity(probes::PARAMETER_PROBES.len());
        for (name, definition) in probes::PARAMETER_PROBES {
            match self.number_for_name(name) {
                Some(syscall_id) => out.push(ParameterProbe { syscall_id, definition: *definition }),
                None => debug!("No syscall number for {name} on {:?}, not probing it", self.arch),
            }
        }
        out.sort_by_key(|p| p.syscall_id);
        out
    }

    /// Number of syscalls with a known number
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn forget_declaration(&mut self, name: &str) {
        self.declarations.remove(name);
    }
}
