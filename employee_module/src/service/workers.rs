use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Background poller threads sharing one stop flag.
#[derive(Debug, Default)]
pub struct WorkerControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag to hand to a worker loop.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn push(&mut self, handle: thread::JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, handles: impl IntoIterator<Item = thread::JoinHandle<()>>) {
        self.handles.extend(handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Sleep for `total`, waking early once the stop flag is raised.
pub fn sleep_unless_stopped(total: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop_flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(200)));
    }
}
