use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

/// The backing store of a stream primitive.
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    File(BufReader<File>),
    Sink(File),
}

/// A shared stream handle, stored in object primitives and the `%strm`
/// register. Identity (not contents) is what the VM compares.
#[derive(Clone)]
pub struct StreamRef(Arc<Mutex<StreamKind>>);

impl fmt::Debug for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.0.lock() {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
            StreamKind::File(_) => "file",
            StreamKind::Sink(_) => "sink",
        };
        write!(f, "StreamRef({kind})")
    }
}

impl StreamRef {
    pub fn stdin() -> Self {
        Self(Arc::new(Mutex::new(StreamKind::Stdin)))
    }

    pub fn stdout() -> Self {
        Self(Arc::new(Mutex::new(StreamKind::Stdout)))
    }

    pub fn stderr() -> Self {
        Self(Arc::new(Mutex::new(StreamKind::Stderr)))
    }

    pub fn open(path: &str) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self(Arc::new(Mutex::new(StreamKind::File(
            BufReader::new(file),
        )))))
    }

    pub fn create(path: &str) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self(Arc::new(Mutex::new(StreamKind::Sink(file)))))
    }

    pub fn identity_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        match &mut *self.0.lock() {
            StreamKind::Stdout => io::stdout().write_all(text.as_bytes()),
            StreamKind::Stderr => io::stderr().write_all(text.as_bytes()),
            StreamKind::Sink(file) => file.write_all(text.as_bytes()),
            StreamKind::Stdin | StreamKind::File(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not writable",
            )),
        }
    }

    pub fn write_line(&self, text: &str) -> io::Result<()> {
        self.write_str(text)?;
        self.write_str("\n")
    }

    /// Read one line, without the trailing newline. Empty string at EOF.
    pub fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        match &mut *self.0.lock() {
            StreamKind::Stdin => {
                io::stdin().lock().read_line(&mut line)?;
            }
            StreamKind::File(reader) => {
                reader.read_line(&mut line)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is not readable",
                ));
            }
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    pub fn read_all(&self) -> io::Result<String> {
        let mut text = String::new();
        match &mut *self.0.lock() {
            StreamKind::File(reader) => {
                reader.read_to_string(&mut text)?;
            }
            StreamKind::Stdin => {
                io::stdin().lock().read_to_string(&mut text)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is not readable",
                ));
            }
        }
        Ok(text)
    }
}

/// A shared handle to a spawned child process.
#[derive(Clone)]
pub struct ProcessRef(Arc<Mutex<Option<Child>>>);

impl fmt::Debug for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessRef")
    }
}

impl ProcessRef {
    /// Spawn `command` through the platform shell.
    pub fn spawn(command: &str) -> io::Result<Self> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()?;
        Ok(Self(Arc::new(Mutex::new(Some(child)))))
    }

    /// Wait for completion and return the exit code. Waiting twice
    /// returns -1.
    pub fn wait(&self) -> io::Result<i64> {
        let mut guard = self.0.lock();
        match guard.take() {
            Some(mut child) => {
                let status = child.wait()?;
                Ok(status.code().unwrap_or(-1) as i64)
            }
            None => Ok(-1),
        }
    }

    pub fn identity_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
