use std::error::Error;
use std::fmt;

/// Displays an error with its whole `source()` chain on a single line.
///
/// The alternative `{:#}`-style multi-line reports are too noisy for
/// log lines; this joins the chain with `: ` instead.
pub struct CompactError<'e, E>(&'e E)
where
    E: Error + ?Sized;

impl<E> fmt::Display for CompactError<'_, E>
where
    E: Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(inner) = source {
            write!(f, ": {inner}")?;
            source = inner.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    type Report<'e>: fmt::Display
    where
        Self: 'e;

    fn fmt_compact(&self) -> Self::Report<'_>;
}

impl<E> FmtCompact for E
where
    E: Error + ?Sized,
{
    type Report<'e>
        = CompactError<'e, E>
    where
        E: 'e;

    fn fmt_compact(&self) -> Self::Report<'_> {
        CompactError(self)
    }
}
