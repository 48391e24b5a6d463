//! Print plumbing.
//!
//! `print(...)` and diagnostic output go through a writer supplied by the
//! embedder, so output is testable and host-redirectable.

/// Destination for `print` output.
pub trait PrintWriter {
    fn print(&mut self, line: &str);
    fn eprint(&mut self, line: &str);
}

impl<W: PrintWriter + ?Sized> PrintWriter for Box<W> {
    fn print(&mut self, line: &str) {
        (**self).print(line);
    }

    fn eprint(&mut self, line: &str) {
        (**self).eprint(line);
    }
}

impl<W: PrintWriter + ?Sized> PrintWriter for &mut W {
    fn print(&mut self, line: &str) {
        (**self).print(line);
    }

    fn eprint(&mut self, line: &str) {
        (**self).eprint(line);
    }
}

/// Writes to the process stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }

    fn eprint(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

/// Collects output into strings, for tests and capture modes.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint {
    pub output: String,
    pub errors: String,
}

impl PrintWriter for CollectStringPrint {
    fn print(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn eprint(&mut self, line: &str) {
        self.errors.push_str(line);
        self.errors.push('\n');
    }
}

/// Swallows all output; the CLI's quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&mut self, _line: &str) {}
    fn eprint(&mut self, _line: &str) {}
}
