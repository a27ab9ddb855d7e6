use std::fmt;

/// Stable error kinds, matching the taxonomy in the specification's error
/// handling design. Each maps to a reserved exit code so a CLI edge can
/// translate an `Error` into a process exit status without re-deriving the
/// mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileMissing,
    FileInvalid,
    FileOpen,
    FileRead,
    FileWrite,
    FileOwner,
    PathMissing,
    PathCreate,
    PathNotEmpty,
    PathOpen,
    LinkMap,
    TablespaceMap,
    BackupMismatch,
    BackupSetInvalid,
    Checksum,
    Format,
    Crypto,
    ArchiveMismatch,
    ArchiveTimeout,
    LockAcquire,
    Stop,
    HostConnect,
    Protocol,
    OptionInvalid,
    OptionInvalidValue,
    Assert,
}

impl ErrorKind {
    /// Exit code table from the specification's external interfaces
    /// section. `0` (success) and `1` (warning) are not represented here:
    /// they apply to commands that complete without raising an `Error`.
    pub const fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Checksum => 26,
            ErrorKind::FileMissing => 38,
            ErrorKind::LockAcquire => 50,
            ErrorKind::BackupMismatch => 95,
            // Everything else shares the generic reserved error band; a
            // finer table can be added as new kinds earn a stable code.
            _ => 25,
        }
    }

    pub const fn is_recoverable_as_warning(self) -> bool {
        matches!(self, ErrorKind::FileMissing | ErrorKind::Checksum)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The one error sum type used throughout the workspace's library crates.
///
/// Library code never uses exceptions for control flow; every fallible
/// operation returns `Result<T, Error>`. Where the original system used
/// try/catch to probe feasibility (cipher-pass detection, info/`.copy`
/// fallback), this type's `kind` is matched explicitly instead.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            source: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn from_io(kind: ErrorKind, context: impl Into<String>, err: std::io::Error) -> Self {
        Self::new(kind, context).with_source(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience macro-free constructors used heavily at call sites, mirroring
/// the `bail!`/`format_err!` ergonomics the teacher leans on with `anyhow`.
pub fn err(kind: ErrorKind, message: impl Into<String>) -> Error {
    Error::new(kind, message)
}
