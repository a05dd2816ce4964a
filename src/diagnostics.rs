//! User-facing diagnostics. The handle is carried explicitly rather than read
//! from a process-wide static so that concurrent links and tests can keep
//! their output separate.

use std::fmt::Display;
use std::io::Write;
use std::sync::Mutex;

pub struct Diagnostics {
    program_name: String,
    demangle: bool,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Diagnostics {
    pub fn new(program_name: impl Into<String>) -> Self {
        Self::with_sink(program_name, true, Box::new(std::io::stderr()))
    }

    pub fn with_sink(
        program_name: impl Into<String>,
        demangle: bool,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            program_name: program_name.into(),
            demangle,
            sink: Mutex::new(sink),
        }
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Prints a symbol warning. Concurrent callers are serialized on the sink;
    /// a failed write is not an error worth aborting a link over.
    pub fn warning(&self, location: &str, text: &str) {
        let mut sink = self.sink.lock().expect("diagnostics sink poisoned");
        let _ = writeln!(sink, "{}: {location}: warning: {text}", self.program_name);
    }

    pub(crate) fn symbol_display<'a>(&self, name: &'a [u8]) -> SymbolNameDisplay<'a> {
        SymbolNameDisplay {
            name,
            demangle: self.demangle,
        }
    }
}

pub(crate) struct SymbolNameDisplay<'a> {
    name: &'a [u8],
    demangle: bool,
}

impl Display for SymbolNameDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.name) {
            if self.demangle {
                Display::fmt(&symbolic_demangle::demangle(s), f)
            } else {
                Display::fmt(s, f)
            }
        } else {
            write!(f, "INVALID UTF-8({:?})", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::SharedBuf;

    #[test]
    fn warning_format() {
        let buf = SharedBuf::default();
        let diagnostics = Diagnostics::with_sink("ld", false, Box::new(buf.clone()));
        diagnostics.warning("main.o:(.text+0x10)", "do not use tmpnam");
        assert_eq!(
            buf.contents(),
            "ld: main.o:(.text+0x10): warning: do not use tmpnam\n"
        );
    }

    #[test]
    fn demangled_display() {
        let diagnostics = Diagnostics::with_sink("ld", true, Box::new(std::io::sink()));
        let shown = diagnostics.symbol_display(b"_ZN4core3fmt5Debug3fmt17h0000000000000000E");
        assert!(shown.to_string().contains("core::fmt::Debug"));
    }
}
