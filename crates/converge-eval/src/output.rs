use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
enum Target {
    Stdout,
    Capture(Vec<String>),
}

/// Process-wide report output. Every line goes through one mutex so
/// background workers never interleave partial lines.
#[derive(Debug, Clone)]
pub struct OutputSink {
    target: Arc<Mutex<Target>>,
}

impl OutputSink {
    pub fn stdout() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Stdout)),
        }
    }

    pub fn capture() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Capture(Vec::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Target> {
        match self.target.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn write_line(&self, line: &str) {
        let mut target = self.lock();
        match &mut *target {
            Target::Stdout => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                let _ = writeln!(handle, "{}", line);
                let _ = handle.flush();
            }
            Target::Capture(lines) => lines.push(line.to_string()),
        }
    }

    /// Captured lines; empty when writing to stdout.
    pub fn lines(&self) -> Vec<String> {
        match &*self.lock() {
            Target::Capture(lines) => lines.clone(),
            Target::Stdout => Vec::new(),
        }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::stdout()
    }
}
