use console::style;

/// Status lines for the CLI.
///
/// Everything goes to stderr except `result`, so completions can be piped.
pub struct Output {
    quiet: bool,
}

impl Output {
    pub fn new() -> Self {
        Self { quiet: false }
    }

    pub fn quiet(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Primary command output on stdout
    pub fn result(&self, content: &str) {
        println!("{}", content.trim_end());
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", style("✓").green(), message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", style("⚠").yellow(), message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", style("ℹ").blue(), message);
        }
    }

    pub fn header(&self, message: &str) {
        if !self.quiet {
            eprintln!("\n{}", style(message).bold().underlined());
        }
    }

    pub fn section(&self, message: &str) {
        if !self.quiet {
            eprintln!("\n{}", style(message).bold());
            eprintln!("{}", "─".repeat(40));
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
