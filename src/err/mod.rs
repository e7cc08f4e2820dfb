use std::fmt::{Debug, Display, Formatter};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// An error that remembers where it was raised.
pub struct DaemonError {
    err: String,
    file: &'static str,
    line: u32,
    source: Option<Error>,
}

impl DaemonError {
    pub fn new(
        err: impl Into<String>,
        file: &'static str,
        line: u32,
        source: Option<Error>,
    ) -> Self {
        Self {
            err: err.into(),
            file,
            line,
            source,
        }
    }

    pub fn location(&self) -> (&'static str, u32) {
        (self.file, self.line)
    }
}

#[macro_export]
macro_rules! daemon_error {
    ($fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::DaemonError::new(
            format!($fmt $(,$($args)*)?),
            file!(), line!(), None)
    };
}

#[macro_export]
macro_rules! daemon_error_with_source {
    ($source:expr, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::DaemonError::new(
            format!($fmt $(,$($args)*)?),
            file!(), line!(), Some(Box::new($source) as $crate::err::Error))
    }
}

impl Debug for DaemonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]:{} {}", self.file, self.line, self.err)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl Display for DaemonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error))
    }
}

/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    #[test]
    fn daemon_error_formats_message_and_location() {
        let err = crate::daemon_error!("upload of {} failed", "a.txt");
        assert_eq!(err.to_string(), "upload of a.txt failed");
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("err/mod.rs"), "dbg={}", dbg);
        assert!(dbg.ends_with("upload of a.txt failed"), "dbg={}", dbg);
        assert!(err.source().is_none());
    }

    #[test]
    fn daemon_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = crate::daemon_error_with_source!(io, "cannot delete {}", "/tmp/x");
        assert_eq!(err.to_string(), "cannot delete /tmp/x");
        assert_eq!(err.source().map(|s| s.to_string()), Some("denied".into()));
        assert!(format!("{:?}", err).contains("caused by: denied"));
    }
}
