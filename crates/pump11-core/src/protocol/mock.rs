//! In-memory serial link
//!
//! [`MockLink`] stands in for a serial port: every write is recorded and
//! handed to a responder closure, whose lines become the input the next reads
//! return. Clones share state, so a test can keep a handle after moving the
//! link into a channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProtocolError, SerialLink};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    written: Vec<String>,
    input: VecDeque<String>,
    responder: Responder,
    fail_on_write: bool,
    clears: usize,
}

/// Scripted serial link for tests and dry runs
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// Link answering each written line with the lines `responder` returns.
    ///
    /// Lines are given without terminators; `\r\n` is appended to each.
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                written: Vec::new(),
                input: VecDeque::new(),
                responder: Box::new(responder),
                fail_on_write: false,
                clears: 0,
            })),
        }
    }

    /// Link with nothing connected to it
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide what was written
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything written so far, one entry per write
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().written.len()
    }

    /// How many times the input buffer was cleared
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    /// Queue input that arrives without being asked for
    pub fn push_input(&self, line: &str) {
        self.lock().input.push_back(format!("{}\r\n", line));
    }

    /// Make every following write fail
    pub fn set_fail_on_write(&self, fail: bool) {
        self.lock().fail_on_write = fail;
    }
}

impl SerialLink for MockLink {
    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        state.input.clear();
        state.clears += 1;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        if state.fail_on_write {
            return Err(ProtocolError::SerialError("mock write failure".to_string()));
        }

        let line = String::from_utf8_lossy(data).into_owned();
        let reply = (state.responder)(&line);
        state.written.push(line);
        state
            .input
            .extend(reply.into_iter().map(|l| format!("{}\r\n", l)));
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ProtocolError> {
        Ok(self.lock().input.pop_front().unwrap_or_default())
    }
}
